use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fl_cli::commands::util::{WriteLock, resolve_at};
use fl_cli::commands::{daemon, import, lifecycle, settings, stats, status, tags, tick};
use fl_cli::{Cli, Commands, Config, SettingsAction, TagsAction};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Ok(config)
}

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(fl_db::Database, Config)> {
    let config = load_config(config_path)?;
    let db = fl_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr; stdout carries command output and daemon replies.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let now = Utc::now();
    let mut out = std::io::stdout();

    match &cli.command {
        Some(Commands::Status { json }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut out, &db, &config, now, *json)?;
        }
        Some(Commands::Start { at }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let at = resolve_at(at.as_deref(), now)?;
            let _lock = WriteLock::acquire(&config.lock_path())?;
            lifecycle::start(&mut out, &db, &config, at)?;
        }
        Some(Commands::Stop) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let _lock = WriteLock::acquire(&config.lock_path())?;
            lifecycle::stop(&mut out, &db, &config)?;
        }
        Some(Commands::Signal { signal, at }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let at = resolve_at(at.as_deref(), now)?;
            let _lock = WriteLock::acquire(&config.lock_path())?;
            lifecycle::signal(&mut out, &db, &config, (*signal).into(), at)?;
        }
        Some(Commands::Tick { events, json }) => {
            // The tick opens its own connection on a worker thread.
            let config = load_config(cli.config.as_deref())?;
            let _lock = WriteLock::acquire(&config.lock_path())?;
            tick::run(&mut out, &config, events.as_deref(), now, *json)?;
        }
        Some(Commands::Import { path, no_auto_tag }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let _lock = WriteLock::acquire(&config.lock_path())?;
            import::run(&mut out, &db, path, !*no_auto_tag)?;
        }
        Some(Commands::Stats(args)) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            stats::run(&mut out, &db, &config, args.view, args.date, args.json, now)?;
        }
        Some(Commands::Tags(action)) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let _lock = match action {
                TagsAction::List { .. } | TagsAction::Recommend { .. } => None,
                _ => Some(WriteLock::acquire(&config.lock_path())?),
            };
            tags::run(&mut out, &db, action)?;
        }
        Some(Commands::Settings(action)) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let _lock = match action {
                SettingsAction::Show { .. } => None,
                SettingsAction::Set(_) => Some(WriteLock::acquire(&config.lock_path())?),
            };
            settings::run(&mut out, &db, action)?;
        }
        Some(Commands::Daemon) => {
            let config = load_config(cli.config.as_deref())?;
            daemon::run(config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
