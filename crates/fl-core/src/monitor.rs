//! Detection pipeline: lifecycle signal → detector → validator → store.
//!
//! The monitor holds no state of its own between calls. Every operation
//! loads the detector snapshot, applies one transition, persists the new
//! snapshot and only then acts on a finalized candidate. A process that is
//! suspended or killed between two signals resumes from the last snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detector::{
    DetectorSnapshot, DetectorState, LifecycleSignal, LongInactivity, SessionDetector, Transition,
};
use crate::error::StoreError;
use crate::events::EventSink;
use crate::store::Store;
use crate::validator::{Validator, Verdict};

/// Host capabilities relevant to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Whether the user granted device-activity monitoring.
    pub monitoring_permitted: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            monitoring_permitted: true,
        }
    }
}

/// Result of [`FocusMonitor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Monitoring is not permitted; the detector stays idle.
    PermissionDenied,
}

/// Result of one lifecycle signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalOutcome {
    pub transition: Transition,
    /// Present when the signal finalized a candidate.
    pub verdict: Option<Verdict>,
}

/// Drives the detector against a store and reports accepted sessions.
pub struct FocusMonitor<'a, S: Store + ?Sized, E: EventSink + ?Sized> {
    store: &'a S,
    sink: &'a E,
    validator: Validator,
    capabilities: Capabilities,
}

impl<'a, S: Store + ?Sized, E: EventSink + ?Sized> FocusMonitor<'a, S, E> {
    /// Creates a monitor over `store`, reporting to `sink`.
    pub fn new(store: &'a S, sink: &'a E, validator: Validator) -> Self {
        Self {
            store,
            sink,
            validator,
            capabilities: Capabilities::default(),
        }
    }

    /// Overrides the host capabilities.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Returns the persisted detector snapshot (default when none exists).
    pub fn status(&self) -> Result<DetectorSnapshot, StoreError> {
        Ok(self.store.load_detector()?.unwrap_or_default())
    }

    /// Begins monitoring.
    pub fn start(&self, now: DateTime<Utc>) -> Result<StartOutcome, StoreError> {
        if !self.capabilities.monitoring_permitted {
            tracing::warn!("monitoring not permitted; staying idle");
            return Ok(StartOutcome::PermissionDenied);
        }
        let mut detector = self.load()?;
        let transition = detector.start(now);
        if transition.is_noop() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.store.save_detector(detector.snapshot())?;
        tracing::info!(at = %now, "monitoring started");
        Ok(StartOutcome::Started)
    }

    /// Stops monitoring and cancels any pending tick.
    pub fn stop(&self) -> Result<Transition, StoreError> {
        let mut detector = self.load()?;
        let transition = detector.stop();
        self.store.save_detector(detector.snapshot())?;
        if transition.from != DetectorState::Idle {
            tracing::info!(from = %transition.from, "monitoring stopped");
        }
        Ok(transition)
    }

    /// Applies a lifecycle signal and validates any finalized candidate.
    ///
    /// The candidate is stored before the new snapshot, so a failed insert
    /// leaves the inactive mark in place for the next signal. A retry after
    /// a failed snapshot write is caught by the duplicate rule.
    pub fn handle_signal(
        &self,
        signal: LifecycleSignal,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, StoreError> {
        let mut detector = self.load()?;
        let before = detector.snapshot().clone();
        let transition = detector.handle(signal, now);

        let verdict = match transition.candidate {
            Some(candidate) => Some(self.validator.validate_and_store(self.store, candidate)?),
            None => None,
        };
        if detector.snapshot() != &before {
            self.store.save_detector(detector.snapshot())?;
        }
        if let Some(Verdict::Accepted(session)) = &verdict {
            self.sink.on_focus_session_detected(session);
        }

        Ok(SignalOutcome {
            transition,
            verdict,
        })
    }

    /// Checks for sustained inactivity during a background tick.
    ///
    /// Never finalizes a candidate; only the next active signal knows the end.
    pub fn observe_tick(&self, now: DateTime<Utc>) -> Result<Option<LongInactivity>, StoreError> {
        let detector = self.load()?;
        let observed = detector.observe_tick(now);
        if let Some(inactivity) = &observed {
            tracing::info!(
                since = %inactivity.since,
                elapsed_mins = inactivity.elapsed.num_minutes(),
                "sustained inactivity observed"
            );
        }
        Ok(observed)
    }

    /// Records when the next background tick is due.
    ///
    /// A due time is not recorded while idle; `stop` cancelled the schedule.
    pub fn set_next_tick(&self, at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let mut detector = self.load()?;
        if at.is_some() && detector.snapshot().state == DetectorState::Idle {
            tracing::debug!(?at, "not monitoring; next tick not recorded");
            return Ok(());
        }
        detector.set_next_tick(at);
        self.store.save_detector(detector.snapshot())
    }

    fn load(&self) -> Result<SessionDetector, StoreError> {
        Ok(SessionDetector::new(
            self.status()?,
            self.validator.rules().min_focus,
        ))
    }
}
