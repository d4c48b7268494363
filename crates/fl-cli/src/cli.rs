//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fl_core::{LifecycleSignal, ReportPeriod};

/// Passive focus tracker.
///
/// Infers uninterrupted focus periods from app lifecycle signals, records app
/// usage, tags it by scene and reports statistics.
#[derive(Debug, Parser)]
#[command(name = "fl", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show detector state and today's totals.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Begin monitoring.
    Start {
        /// When monitoring started (RFC 3339 or e.g. "5 minutes ago").
        #[arg(long)]
        at: Option<String>,
    },

    /// Stop monitoring and cancel the pending tick.
    Stop,

    /// Deliver an app lifecycle signal.
    Signal {
        signal: SignalArg,

        /// When the signal happened (RFC 3339 or e.g. "5 minutes ago").
        #[arg(long)]
        at: Option<String>,
    },

    /// Run one bounded background tick.
    Tick {
        /// JSONL file of usage events to record during the tick.
        #[arg(long)]
        events: Option<PathBuf>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Record app usage events from a JSONL file ("-" for stdin).
    Import {
        path: PathBuf,

        /// Do not auto-tag imported sessions.
        #[arg(long)]
        no_auto_tag: bool,
    },

    /// Usage and focus statistics.
    Stats(StatsArgs),

    /// Manage and recommend scene tags.
    #[command(subcommand)]
    Tags(TagsAction),

    /// Show or change user settings.
    #[command(subcommand)]
    Settings(SettingsAction),

    /// Run the long-lived monitor, reading JSON messages from stdin.
    Daemon,
}

/// Lifecycle signals accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignalArg {
    BecameActive,
    ResignActive,
    Background,
    Foreground,
}

impl From<SignalArg> for LifecycleSignal {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::BecameActive => Self::BecameActive,
            SignalArg::ResignActive => Self::WillResignActive,
            SignalArg::Background => Self::EnteredBackground,
            SignalArg::Foreground => Self::WillEnterForeground,
        }
    }
}

/// Arguments shared by all statistics views.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Reference local date (defaults to today).
    #[arg(long, global = true)]
    pub date: Option<NaiveDate>,

    /// Output as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub view: StatsView,
}

/// Statistics views.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum StatsView {
    /// Daily usage totals.
    Day,
    /// Per-app breakdown for the day.
    Apps,
    /// Per-tag distribution for the day.
    Tags,
    /// Usage by hour of day.
    Hourly,
    /// Weekday vs weekend over the last 14 days.
    Weekly,
    /// Daily points with top apps.
    Trend {
        /// 30 days instead of 7.
        #[arg(long)]
        month: bool,
    },
    /// Tag shares compared with the previous period.
    TagReport {
        #[arg(long, value_enum, default_value_t = PeriodArg::Week)]
        period: PeriodArg,
    },
    /// Validated focus time against the daily goal.
    Focus,
}

/// Tag report period lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeriodArg {
    Day,
    Week,
    Month,
}

impl From<PeriodArg> for ReportPeriod {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Day => Self::Day,
            PeriodArg::Week => Self::Week,
            PeriodArg::Month => Self::Month,
        }
    }
}

/// Tag subcommands. Tags are addressed by ID or exact name.
#[derive(Debug, Subcommand)]
pub enum TagsAction {
    /// List tags with their associated apps.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create a custom tag.
    Create {
        name: String,
        /// `#RRGGBB` color.
        #[arg(long, default_value = "#808080")]
        color: String,
    },
    /// Rename a tag.
    Rename { tag: String, name: String },
    /// Delete a custom tag.
    Delete { tag: String },
    /// Recommend tags for an app.
    Recommend {
        app_id: String,
        #[arg(long)]
        category: Option<String>,
        /// Show up to N candidates instead of the best one.
        #[arg(long)]
        top: Option<usize>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Apply a tag to an app session.
    Apply {
        session_id: String,
        tag: String,
        /// Remember the tag for this app.
        #[arg(long)]
        confirm: bool,
    },
}

/// Settings subcommands.
#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Print the current settings.
    Show {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Change one or more settings.
    Set(SettingsUpdate),
}

/// Settings changes; unset fields keep their value.
#[derive(Debug, Default, Args)]
pub struct SettingsUpdate {
    /// Daily focus goal in minutes.
    #[arg(long)]
    pub goal_minutes: Option<u32>,
    /// Sleep window as HH:MM-HH:MM.
    #[arg(long)]
    pub sleep: Option<String>,
    /// Lunch window as HH:MM-HH:MM, or "none".
    #[arg(long)]
    pub lunch: Option<String>,
    /// "local", "utc" or a fixed offset such as +02:00.
    #[arg(long)]
    pub timezone: Option<String>,
    /// Skip the sleep window on weekends.
    #[arg(long)]
    pub flexible_sleep_days: Option<bool>,
}
