//! Focus tracker CLI library.
//!
//! This crate provides the `fl` command-line interface and the stdin-driven
//! monitor daemon on top of `fl-core` and `fl-db`.

mod cli;
pub mod commands;
mod config;

pub use cli::{
    Cli, Commands, PeriodArg, SettingsAction, SettingsUpdate, SignalArg, StatsArgs, StatsView,
    TagsAction,
};
pub use config::Config;
