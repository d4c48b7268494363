//! Background tick command and the runtimes that schedule ticks.
//!
//! The host wakes `fl tick` periodically. Each tick runs on a blocking
//! thread with its own database connection while the async side enforces
//! the external budget: when it elapses the expiration token is set and the
//! tick stops after its current unit of work.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fl_core::scheduler::TICK_TASK_ID;
use fl_core::{
    AppSession, BackgroundTicker, EventSink, ExpirationToken, FocusSession, SchedulerRuntime,
    SchedulingError, TickOutcome, TickReport, TickRequest, TracingSink, UsageEvent,
    UsageEventSource, Validator,
};
use fl_db::Database;

use super::import::JsonlSource;
use super::lifecycle::rfc3339;
use super::util::write_json;
use crate::Config;

/// A runtime that remembers the latest tick request.
///
/// The durable copy of the due time is `next_tick_at` in the detector
/// snapshot; the daemon sleeps until [`TimerRuntime::requested`].
#[derive(Debug, Clone, Default)]
pub struct TimerRuntime {
    registered: bool,
    requested: Option<DateTime<Utc>>,
}

impl TimerRuntime {
    /// A runtime with the tick task already registered.
    pub fn registered() -> Self {
        Self {
            registered: true,
            requested: None,
        }
    }

    /// When the next tick was last requested for.
    pub const fn requested(&self) -> Option<DateTime<Utc>> {
        self.requested
    }

    /// Drops the pending request.
    pub fn cancel(&mut self) {
        self.requested = None;
    }

    /// Requests a tick directly, bypassing the ticker.
    pub fn request_at(&mut self, at: DateTime<Utc>) {
        self.requested = Some(at);
    }
}

impl SchedulerRuntime for TimerRuntime {
    fn register(&mut self, task_id: &'static str) -> Result<(), SchedulingError> {
        if task_id != TICK_TASK_ID {
            return Err(SchedulingError(format!("unknown task {task_id}")));
        }
        self.registered = true;
        Ok(())
    }

    fn submit(&mut self, request: &TickRequest) -> Result<(), SchedulingError> {
        if !self.registered {
            return Err(SchedulingError(format!(
                "task {} is not registered",
                request.task_id
            )));
        }
        tracing::debug!(at = %request.earliest_begin, "tick requested");
        self.requested = Some(request.earliest_begin);
        Ok(())
    }
}

/// A usage source that never yields events.
struct NoEvents;

impl UsageEventSource for NoEvents {
    fn next_event(&mut self) -> Option<UsageEvent> {
        None
    }
}

/// Events raised on the tick worker.
///
/// Each event is logged as it happens and kept so the caller can replay it
/// into its own sink once the worker has finished.
#[derive(Debug, Default)]
pub struct TickEvents {
    focus: Mutex<Vec<FocusSession>>,
    usage: Mutex<Vec<AppSession>>,
}

impl TickEvents {
    /// Replays the collected events into `sink`.
    pub fn forward<E: EventSink + ?Sized>(self, sink: &E) {
        let focus = self.focus.into_inner().unwrap_or_else(PoisonError::into_inner);
        for session in &focus {
            sink.on_focus_session_detected(session);
        }
        let usage = self.usage.into_inner().unwrap_or_else(PoisonError::into_inner);
        for session in &usage {
            sink.on_app_usage_detected(session);
        }
    }
}

impl EventSink for TickEvents {
    fn on_focus_session_detected(&self, session: &FocusSession) {
        TracingSink.on_focus_session_detected(session);
        self.focus
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
    }

    fn on_app_usage_detected(&self, session: &AppSession) {
        TracingSink.on_app_usage_detected(session);
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
    }
}

/// Everything a finished tick hands back.
#[derive(Debug)]
pub struct TickRun {
    pub report: TickReport,
    pub runtime: TimerRuntime,
    pub events: TickEvents,
}

/// Runs one tick against the database at `database_path`, bounded by the
/// configured external budget.
pub async fn run_bounded<Src>(
    database_path: PathBuf,
    config: &Config,
    mut runtime: TimerRuntime,
    mut source: Src,
    now: DateTime<Utc>,
) -> Result<TickRun>
where
    Src: UsageEventSource + Send + 'static,
{
    let budget = config.tick_budget();
    let interval = config.tick_interval();
    let validator = Validator::new(config.validation_rules());
    let token = ExpirationToken::new();
    let worker_token = token.clone();

    let mut handle = tokio::task::spawn_blocking(move || -> Result<TickRun> {
        let db = Database::open(&database_path).context("failed to open database")?;
        let events = TickEvents::default();
        let ticker = BackgroundTicker::new(&db, &events, validator)
            .with_interval(interval)
            .with_budget(budget);
        let report = ticker.handle(&mut runtime, &mut source, now, &worker_token);
        Ok(TickRun {
            report,
            runtime,
            events,
        })
    });

    let joined = match tokio::time::timeout(budget.external(), &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(
                budget_ms = budget.external().as_millis(),
                "tick exceeded its budget; expiring"
            );
            token.expire();
            handle.await
        }
    };
    joined.context("tick worker panicked")?
}

/// `fl tick`: runs one tick, optionally recording usage events from a file.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    events: Option<&Path>,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to initialize tokio runtime")?;

    let database_path = config.database_path.clone();
    let timer = TimerRuntime::registered();
    let TickRun { report, .. } = match events {
        Some(path) => {
            let source = JsonlSource::open(path)?;
            runtime.block_on(run_bounded(database_path, config, timer, source, now))?
        }
        None => runtime.block_on(run_bounded(database_path, config, timer, NoEvents, now))?,
    };

    if json {
        return write_json(writer, &report);
    }
    writeln!(
        writer,
        "Tick {}: recorded {}, skipped {}",
        outcome_label(&report),
        report.recorded,
        report.skipped
    )?;
    if let Some(inactivity) = &report.inactivity {
        writeln!(
            writer,
            "Inactive since {} ({}m)",
            rfc3339(inactivity.since),
            inactivity.elapsed.num_minutes()
        )?;
    }
    if let Some(error) = &report.error {
        writeln!(writer, "Error: {error}")?;
    }
    if report.rescheduled {
        writeln!(writer, "Next tick due at {}", rfc3339(report.next_tick_at))?;
    } else {
        writeln!(writer, "Next tick could not be scheduled")?;
    }
    Ok(())
}

const fn outcome_label(report: &TickReport) -> &'static str {
    match report.outcome {
        TickOutcome::Completed => "completed",
        TickOutcome::TimedOut => "timed out",
        TickOutcome::Expired => "expired",
        TickOutcome::Failed => "failed",
    }
}
