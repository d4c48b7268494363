//! Background tick adapter.
//!
//! The host runtime wakes the process periodically and may expire a tick
//! before it finishes. A tick therefore:
//!
//! 1. reschedules the next tick first, whatever happens afterwards;
//! 2. performs small units of work, checking the expiration token and its
//!    own deadline between units. The deadline is strictly shorter than the
//!    runtime's budget;
//! 3. reports an outcome instead of returning an error.
//!
//! Every unit is a single-record write, so an expired tick leaves the store
//! consistent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detector::LongInactivity;
use crate::error::SchedulingError;
use crate::events::EventSink;
use crate::monitor::FocusMonitor;
use crate::store::Store;
use crate::usage::{UsageEventSource, UsageRecorder};
use crate::validator::Validator;

/// Task identifier registered with the runtime.
pub const TICK_TASK_ID: &str = "focuslog.background-tick";

/// Default spacing between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default execution budget granted by the runtime.
pub const DEFAULT_EXTERNAL_BUDGET: Duration = Duration::from_secs(30);

/// Default self-imposed tick timeout.
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(25);

/// Conditions the runtime must satisfy before running a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickConstraints {
    pub requires_network: bool,
    pub requires_external_power: bool,
}

/// A request for the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickRequest {
    pub task_id: &'static str,
    pub earliest_begin: DateTime<Utc>,
    pub constraints: TickConstraints,
}

/// The external scheduler that delivers ticks.
pub trait SchedulerRuntime {
    /// Binds `task_id` to this process's tick handler.
    fn register(&mut self, task_id: &'static str) -> Result<(), SchedulingError>;

    /// Asks for the next tick no earlier than `request.earliest_begin`.
    fn submit(&mut self, request: &TickRequest) -> Result<(), SchedulingError>;
}

/// Set by the runtime when the tick's execution budget has run out.
#[derive(Debug, Clone, Default)]
pub struct ExpirationToken(Arc<AtomicBool>);

impl ExpirationToken {
    /// Creates an unexpired token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the tick as expired.
    pub fn expire(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether the runtime expired the tick.
    pub fn is_expired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Execution budget of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    external: Duration,
    timeout: Duration,
}

impl Default for TickBudget {
    fn default() -> Self {
        Self {
            external: DEFAULT_EXTERNAL_BUDGET,
            timeout: DEFAULT_TICK_TIMEOUT,
        }
    }
}

impl TickBudget {
    /// Creates a budget, pulling `timeout` below `external` when needed.
    pub fn new(external: Duration, timeout: Duration) -> Self {
        if timeout < external {
            return Self { external, timeout };
        }
        let clamped = external.mul_f64(5.0 / 6.0);
        tracing::warn!(
            external_ms = external.as_millis(),
            timeout_ms = timeout.as_millis(),
            clamped_ms = clamped.as_millis(),
            "tick timeout must be shorter than the external budget; clamping"
        );
        Self {
            external,
            timeout: clamped,
        }
    }

    /// The runtime's budget.
    pub const fn external(&self) -> Duration {
        self.external
    }

    /// The self-imposed timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Completed,
    /// The self-imposed deadline passed.
    TimedOut,
    /// The runtime expired the tick.
    Expired,
    /// A unit of work failed.
    Failed,
}

/// Summary handed back to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub rescheduled: bool,
    pub next_tick_at: DateTime<Utc>,
    pub recorded: usize,
    pub skipped: usize,
    #[serde(skip)]
    pub inactivity: Option<LongInactivity>,
    pub error: Option<String>,
}

impl TickReport {
    /// Whether the runtime should treat the tick as successful.
    pub const fn success(&self) -> bool {
        matches!(self.outcome, TickOutcome::Completed)
    }
}

/// Handles background ticks for one store.
pub struct BackgroundTicker<'a, S: Store + ?Sized, E: EventSink + ?Sized> {
    store: &'a S,
    sink: &'a E,
    validator: Validator,
    interval: Duration,
    budget: TickBudget,
    constraints: TickConstraints,
}

impl<'a, S: Store + ?Sized, E: EventSink + ?Sized> BackgroundTicker<'a, S, E> {
    /// Creates a ticker with default interval and budget.
    pub fn new(store: &'a S, sink: &'a E, validator: Validator) -> Self {
        Self {
            store,
            sink,
            validator,
            interval: DEFAULT_TICK_INTERVAL,
            budget: TickBudget::default(),
            constraints: TickConstraints::default(),
        }
    }

    /// Overrides the tick spacing.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the execution budget.
    #[must_use]
    pub const fn with_budget(mut self, budget: TickBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Registers the tick task with the runtime and requests the first tick.
    pub fn install<R: SchedulerRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SchedulingError> {
        runtime.register(TICK_TASK_ID)?;
        let next = self.next_tick(now);
        runtime.submit(&self.request(next))?;
        self.record_next_tick(Some(next));
        Ok(next)
    }

    /// Runs one tick.
    pub fn handle<R: SchedulerRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        source: &mut dyn UsageEventSource,
        now: DateTime<Utc>,
        expiration: &ExpirationToken,
    ) -> TickReport {
        let started = Instant::now();
        let next_tick_at = self.next_tick(now);
        let rescheduled = match runtime.submit(&self.request(next_tick_at)) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "failed to reschedule tick; next wakeup will retry");
                false
            }
        };
        self.record_next_tick(Some(next_tick_at));

        let mut report = TickReport {
            outcome: TickOutcome::Completed,
            rescheduled,
            next_tick_at,
            recorded: 0,
            skipped: 0,
            inactivity: None,
            error: None,
        };

        if let Some(outcome) = self.interrupted(started, expiration) {
            report.outcome = outcome;
            return self.finish(report);
        }
        let monitor = FocusMonitor::new(self.store, self.sink, self.validator);
        match monitor.observe_tick(now) {
            Ok(inactivity) => report.inactivity = inactivity,
            Err(err) => {
                report.outcome = TickOutcome::Failed;
                report.error = Some(err.to_string());
                return self.finish(report);
            }
        }

        let recorder = UsageRecorder::new(self.store, self.sink);
        loop {
            if let Some(outcome) = self.interrupted(started, expiration) {
                report.outcome = outcome;
                break;
            }
            let Some(event) = source.next_event() else {
                break;
            };
            match recorder.record(event) {
                Ok(Some(_)) => report.recorded += 1,
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.outcome = TickOutcome::Failed;
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }

        self.finish(report)
    }

    fn interrupted(&self, started: Instant, expiration: &ExpirationToken) -> Option<TickOutcome> {
        if expiration.is_expired() {
            Some(TickOutcome::Expired)
        } else if started.elapsed() >= self.budget.timeout() {
            Some(TickOutcome::TimedOut)
        } else {
            None
        }
    }

    fn finish(&self, report: TickReport) -> TickReport {
        match report.outcome {
            TickOutcome::Completed => tracing::debug!(
                recorded = report.recorded,
                skipped = report.skipped,
                "tick completed"
            ),
            outcome => tracing::warn!(
                ?outcome,
                recorded = report.recorded,
                error = report.error.as_deref().unwrap_or(""),
                "tick ended early"
            ),
        }
        report
    }

    fn next_tick(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval =
            chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::minutes(15));
        now + interval
    }

    const fn request(&self, earliest_begin: DateTime<Utc>) -> TickRequest {
        TickRequest {
            task_id: TICK_TASK_ID,
            earliest_begin,
            constraints: self.constraints,
        }
    }

    fn record_next_tick(&self, at: Option<DateTime<Utc>>) {
        let monitor = FocusMonitor::new(self.store, self.sink, self.validator);
        if let Err(err) = monitor.set_next_tick(at) {
            tracing::warn!(error = %err, "failed to persist next tick time");
        }
    }
}
