//! CLI subcommand implementations.

pub mod daemon;
pub mod import;
pub mod lifecycle;
pub mod settings;
pub mod stats;
pub mod status;
pub mod tags;
pub mod tick;
pub mod util;
