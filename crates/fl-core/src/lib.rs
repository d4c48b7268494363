//! Core domain logic for focuslog.
//!
//! This crate contains the fundamental types and engines for:
//! - Focus detection: a lifecycle-driven state machine that turns long
//!   inactivity into focus session candidates
//! - Validation: filtering candidates by duration, duplicates and the user's
//!   sleep and lunch windows
//! - Usage recording: turning app usage events into tagged app sessions
//! - Statistics: daily, hourly, per-tag and trend aggregates behind a
//!   time-bounded cache
//! - Scene tagging: tag management and rule-based tag recommendation
//! - Background ticks: bounded, interruptible periodic maintenance
//!
//! Persistence is abstracted behind [`Store`]; `fl-db` provides the `SQLite`
//! implementation and [`MemoryStore`] backs the tests.

pub mod cache;
pub mod calendar;
pub mod detector;
pub mod error;
pub mod events;
pub mod monitor;
pub mod recommend;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod settings;
pub mod stats;
pub mod store;
pub mod tag;
mod types;
pub mod usage;
pub mod validator;

pub use cache::{CacheMetrics, InvalidatingStore, StatsCache};
pub use calendar::Calendar;
pub use detector::{DetectorSnapshot, DetectorState, LifecycleSignal, SessionDetector, Transition};
pub use error::{SchedulingError, StoreError, TagError};
pub use events::{EventSink, TracingSink};
pub use monitor::{Capabilities, FocusMonitor, SignalOutcome, StartOutcome};
pub use recommend::{Recommendation, RecommendationSource, TagRecommender};
pub use scheduler::{
    BackgroundTicker, ExpirationToken, SchedulerRuntime, TickBudget, TickOutcome, TickReport,
    TickRequest,
};
pub use service::StatisticsService;
pub use session::{AppSession, FocusCandidate, FocusSession};
pub use settings::{Settings, TimeWindow, TimezoneMode};
pub use stats::ReportPeriod;
pub use store::{MemoryStore, Store};
pub use tag::{SceneTag, TagAssociation, TagListing};
pub use types::{AppId, Confidence, SessionId, TagId, ValidationError};
pub use usage::{DrainSummary, UsageEvent, UsageEventSource, UsageRecorder};
pub use validator::{Rejection, ValidationRules, Validator, Verdict};
