//! Focus session detection state machine.
//!
//! Detection is driven entirely by lifecycle signals. The detector never
//! runs a live timer: when the app resigns active it records the instant,
//! and when it becomes active again the elapsed wall-clock gap is compared
//! against the focus threshold. The start of a focus period is therefore
//! only known in hindsight and its end only at the next active signal.
//!
//! # States
//!
//! ```text
//!            start()                 resign / background
//!   Idle ─────────────▶ Active ─────────────────────────▶ Inactive
//!    ▲                    ▲                                  │
//!    │ stop()             └──────── became active ───────────┘
//!    └──── (from any state)         (may emit a candidate)
//! ```
//!
//! The whole state lives in a [`DetectorSnapshot`] that callers persist
//! after every transition, so a process suspended between signals can
//! resume with the inactive mark intact.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::FocusCandidate;

/// Minimum inactivity that counts as focus (30 minutes).
pub const DEFAULT_MIN_FOCUS: Duration = Duration::minutes(30);

/// Detector lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorState {
    /// Not monitoring.
    #[default]
    Idle,
    /// App in the foreground.
    Active,
    /// App backgrounded or device locked.
    Inactive,
}

impl DetectorState {
    /// String representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectorState {
    type Err = UnknownDetectorState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(UnknownDetectorState(s.to_string())),
        }
    }
}

/// Error type for unknown detector state strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown detector state: {0}")]
pub struct UnknownDetectorState(String);

/// Inbound app lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    BecameActive,
    WillResignActive,
    EnteredBackground,
    WillEnterForeground,
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BecameActive => "became_active",
            Self::WillResignActive => "will_resign_active",
            Self::EnteredBackground => "entered_background",
            Self::WillEnterForeground => "will_enter_foreground",
        };
        write!(f, "{s}")
    }
}

/// Durable detector state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorSnapshot {
    pub state: DetectorState,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_inactive_at: Option<DateTime<Utc>>,
    /// Earliest time the next background tick was requested for.
    #[serde(default)]
    pub next_tick_at: Option<DateTime<Utc>>,
}

/// Result of applying one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DetectorState,
    pub to: DetectorState,
    /// A focus candidate finalized by this signal.
    pub candidate: Option<FocusCandidate>,
}

impl Transition {
    /// Returns whether the signal changed nothing.
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.candidate.is_none()
    }
}

/// Observation made by a background tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongInactivity {
    pub since: DateTime<Utc>,
    pub elapsed: Duration,
}

/// The focus detection state machine.
#[derive(Debug, Clone)]
pub struct SessionDetector {
    min_focus: Duration,
    snapshot: DetectorSnapshot,
}

impl SessionDetector {
    /// Restores a detector from its persisted snapshot.
    pub const fn new(snapshot: DetectorSnapshot, min_focus: Duration) -> Self {
        Self {
            min_focus,
            snapshot,
        }
    }

    /// Returns the current snapshot for persistence.
    pub const fn snapshot(&self) -> &DetectorSnapshot {
        &self.snapshot
    }

    /// Returns the current state.
    pub const fn state(&self) -> DetectorState {
        self.snapshot.state
    }

    /// Begins monitoring. Only leaves `Idle`; otherwise a no-op.
    pub fn start(&mut self, now: DateTime<Utc>) -> Transition {
        let from = self.snapshot.state;
        if from == DetectorState::Idle {
            self.snapshot.state = DetectorState::Active;
            self.snapshot.last_active_at = Some(now);
            self.snapshot.last_inactive_at = None;
        }
        self.transition(from, None)
    }

    /// Stops monitoring from any state and cancels the pending tick.
    pub fn stop(&mut self) -> Transition {
        let from = self.snapshot.state;
        self.snapshot = DetectorSnapshot::default();
        self.transition(from, None)
    }

    /// Applies a lifecycle signal.
    pub fn handle(&mut self, signal: LifecycleSignal, now: DateTime<Utc>) -> Transition {
        let from = self.snapshot.state;
        match (signal, from) {
            (
                LifecycleSignal::WillResignActive | LifecycleSignal::EnteredBackground,
                DetectorState::Active,
            ) => {
                self.snapshot.state = DetectorState::Inactive;
                self.snapshot.last_inactive_at = Some(now);
                self.transition(from, None)
            }
            (LifecycleSignal::BecameActive, DetectorState::Inactive) => {
                let candidate = self.finalize_candidate(now);
                self.snapshot.state = DetectorState::Active;
                self.snapshot.last_active_at = Some(now);
                self.snapshot.last_inactive_at = None;
                self.transition(from, candidate)
            }
            (LifecycleSignal::BecameActive, DetectorState::Active) => {
                self.snapshot.last_active_at = Some(now);
                self.transition(from, None)
            }
            _ => {
                tracing::debug!(%signal, state = %from, "ignoring lifecycle signal");
                self.transition(from, None)
            }
        }
    }

    /// Reports sustained inactivity without finalizing anything.
    ///
    /// The end of a focus period is only known once the app becomes active
    /// again, so a tick never produces a candidate.
    pub fn observe_tick(&self, now: DateTime<Utc>) -> Option<LongInactivity> {
        if self.snapshot.state != DetectorState::Inactive {
            return None;
        }
        let since = self.snapshot.last_inactive_at?;
        let elapsed = now - since;
        (elapsed >= self.min_focus).then_some(LongInactivity { since, elapsed })
    }

    /// Records when the next background tick is due.
    pub fn set_next_tick(&mut self, at: Option<DateTime<Utc>>) {
        self.snapshot.next_tick_at = at;
    }

    fn finalize_candidate(&self, now: DateTime<Utc>) -> Option<FocusCandidate> {
        let Some(inactive_at) = self.snapshot.last_inactive_at else {
            tracing::warn!("inactive without a recorded inactive mark");
            return None;
        };
        if now - inactive_at >= self.min_focus {
            Some(FocusCandidate::new(inactive_at, now))
        } else {
            None
        }
    }

    const fn transition(&self, from: DetectorState, candidate: Option<FocusCandidate>) -> Transition {
        Transition {
            from,
            to: self.snapshot.state,
            candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn started() -> SessionDetector {
        let mut detector = SessionDetector::new(DetectorSnapshot::default(), DEFAULT_MIN_FOCUS);
        detector.start(ts(-10));
        detector
    }

    #[test]
    fn start_moves_idle_to_active() {
        let mut detector = SessionDetector::new(DetectorSnapshot::default(), DEFAULT_MIN_FOCUS);
        let t = detector.start(ts(0));
        assert_eq!((t.from, t.to), (DetectorState::Idle, DetectorState::Active));
        assert_eq!(detector.snapshot().last_active_at, Some(ts(0)));

        let again = detector.start(ts(5));
        assert!(again.is_noop());
        assert_eq!(detector.snapshot().last_active_at, Some(ts(0)));
    }

    #[test]
    fn long_inactivity_emits_candidate_on_return() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        assert_eq!(detector.state(), DetectorState::Inactive);

        let t = detector.handle(LifecycleSignal::BecameActive, ts(45));
        assert_eq!(t.to, DetectorState::Active);
        assert_eq!(t.candidate, Some(FocusCandidate::new(ts(0), ts(45))));
        assert_eq!(detector.snapshot().last_active_at, Some(ts(45)));
        assert_eq!(detector.snapshot().last_inactive_at, None);
    }

    #[test]
    fn short_inactivity_emits_nothing() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        let t = detector.handle(LifecycleSignal::BecameActive, ts(20));
        assert_eq!(t.candidate, None);
        assert_eq!(detector.state(), DetectorState::Active);
        assert_eq!(detector.snapshot().last_active_at, Some(ts(20)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut detector = started();
        detector.handle(LifecycleSignal::EnteredBackground, ts(0));
        let t = detector.handle(LifecycleSignal::BecameActive, ts(30));
        assert!(t.candidate.is_some());
    }

    #[test]
    fn background_after_resign_keeps_earliest_mark() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        let t = detector.handle(LifecycleSignal::EnteredBackground, ts(2));
        assert!(t.is_noop());
        assert_eq!(detector.snapshot().last_inactive_at, Some(ts(0)));
    }

    #[test]
    fn signals_while_idle_are_ignored() {
        let mut detector = SessionDetector::new(DetectorSnapshot::default(), DEFAULT_MIN_FOCUS);
        assert!(detector.handle(LifecycleSignal::WillResignActive, ts(0)).is_noop());
        assert!(detector.handle(LifecycleSignal::BecameActive, ts(60)).is_noop());
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[test]
    fn foreground_does_not_finalize() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        let t = detector.handle(LifecycleSignal::WillEnterForeground, ts(40));
        assert!(t.is_noop());
        assert_eq!(detector.state(), DetectorState::Inactive);
    }

    #[test]
    fn tick_observes_but_never_finalizes() {
        let mut detector = started();
        assert_eq!(detector.observe_tick(ts(0)), None);
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        assert_eq!(detector.observe_tick(ts(10)), None);

        let seen = detector.observe_tick(ts(50)).unwrap();
        assert_eq!(seen.since, ts(0));
        assert_eq!(seen.elapsed, Duration::minutes(50));
        assert_eq!(detector.state(), DetectorState::Inactive);
        assert_eq!(detector.snapshot().last_inactive_at, Some(ts(0)));
    }

    #[test]
    fn stop_resets_everything() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        detector.set_next_tick(Some(ts(15)));
        let t = detector.stop();
        assert_eq!((t.from, t.to), (DetectorState::Inactive, DetectorState::Idle));
        assert_eq!(detector.snapshot(), &DetectorSnapshot::default());
    }

    #[test]
    fn clock_going_backwards_emits_nothing() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(60));
        let t = detector.handle(LifecycleSignal::BecameActive, ts(0));
        assert_eq!(t.candidate, None);
    }

    #[test]
    fn snapshot_survives_serialization() {
        let mut detector = started();
        detector.handle(LifecycleSignal::WillResignActive, ts(0));
        let json = serde_json::to_string(detector.snapshot()).unwrap();
        let restored: DetectorSnapshot = serde_json::from_str(&json).unwrap();

        let mut resumed = SessionDetector::new(restored, DEFAULT_MIN_FOCUS);
        let t = resumed.handle(LifecycleSignal::BecameActive, ts(45));
        assert_eq!(t.candidate, Some(FocusCandidate::new(ts(0), ts(45))));
    }

    #[test]
    fn state_string_roundtrip() {
        for state in [DetectorState::Idle, DetectorState::Active, DetectorState::Inactive] {
            assert_eq!(state.as_str().parse::<DetectorState>().unwrap(), state);
        }
        assert!("paused".parse::<DetectorState>().is_err());
    }
}
