//! Acceptance rules for focus candidates.
//!
//! Rules run in a fixed order and the first failing rule decides the
//! rejection. Rejected candidates are discarded; only accepted ones are
//! persisted, as a single [`FocusSession`] insert.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::detector::DEFAULT_MIN_FOCUS;
use crate::error::StoreError;
use crate::session::{FocusCandidate, FocusSession};
use crate::settings::Settings;
use crate::store::Store;
use crate::types::SessionId;

/// Thresholds applied by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    /// Shortest acceptable focus period. Default: 30 minutes.
    pub min_focus: Duration,
    /// Tolerance around existing sessions treated as the same event. Default: 5 minutes.
    pub dedup_buffer: Duration,
    /// Longest plausible focus period; longer spans likely include sleep. Default: 8 hours.
    pub max_focus: Duration,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_focus: DEFAULT_MIN_FOCUS,
            dedup_buffer: Duration::minutes(5),
            max_focus: Duration::hours(8),
        }
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TooShort { duration: Duration },
    Duplicate { existing: SessionId },
    InSleepWindow { at: DateTime<Utc> },
    InLunchWindow { at: DateTime<Utc> },
    TooLong { duration: Duration },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { duration } => {
                write!(f, "too short ({}m)", duration.num_minutes())
            }
            Self::Duplicate { existing } => write!(f, "duplicate of focus session {existing}"),
            Self::InSleepWindow { at } => write!(f, "touches sleep window at {}", at.to_rfc3339()),
            Self::InLunchWindow { at } => write!(f, "touches lunch window at {}", at.to_rfc3339()),
            Self::TooLong { duration } => write!(f, "too long ({}h)", duration.num_hours()),
        }
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(FocusSession),
    Rejected(Rejection),
}

impl Verdict {
    /// Returns the accepted session, if any.
    pub const fn accepted(&self) -> Option<&FocusSession> {
        match self {
            Self::Accepted(session) => Some(session),
            Self::Rejected(_) => None,
        }
    }
}

/// Applies [`ValidationRules`] to candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    rules: ValidationRules,
}

impl Validator {
    /// Creates a validator with the given rules.
    pub const fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    /// Returns the configured rules.
    pub const fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Evaluates a candidate against settings and already-stored sessions.
    ///
    /// `existing` should contain the stored valid sessions near the
    /// candidate; only those overlapping the buffered range matter.
    pub fn evaluate(
        &self,
        candidate: &FocusCandidate,
        settings: &Settings,
        existing: &[FocusSession],
    ) -> Result<(), Rejection> {
        let duration = candidate.duration();
        if duration < self.rules.min_focus {
            return Err(Rejection::TooShort { duration });
        }

        if let Some(dup) = existing.iter().find(|s| {
            s.is_valid && s.overlaps_within(candidate.start, candidate.end, self.rules.dedup_buffer)
        }) {
            return Err(Rejection::Duplicate {
                existing: dup.id.clone(),
            });
        }

        for at in [candidate.start, candidate.end] {
            if settings.in_sleep_window(at) {
                return Err(Rejection::InSleepWindow { at });
            }
            if settings.in_lunch_window(at) {
                return Err(Rejection::InLunchWindow { at });
            }
        }

        if duration > self.rules.max_focus {
            return Err(Rejection::TooLong { duration });
        }

        Ok(())
    }

    /// Validates a candidate against the store and persists it if accepted.
    pub fn validate_and_store<S: Store + ?Sized>(
        &self,
        store: &S,
        candidate: FocusCandidate,
    ) -> Result<Verdict, StoreError> {
        // Cheap rejection before touching the store.
        if candidate.duration() < self.rules.min_focus {
            let rejection = Rejection::TooShort {
                duration: candidate.duration(),
            };
            tracing::debug!(%rejection, "focus candidate rejected");
            return Ok(Verdict::Rejected(rejection));
        }

        let settings = store.load_settings()?;
        let existing = store.overlapping_focus_sessions(
            candidate.start - self.rules.dedup_buffer,
            candidate.end + self.rules.dedup_buffer,
        )?;

        match self.evaluate(&candidate, &settings, &existing) {
            Ok(()) => {
                let session = FocusSession::accepted(candidate);
                store.insert_focus_session(&session)?;
                tracing::info!(
                    id = %session.id,
                    start = %session.start_time,
                    duration_secs = session.duration_secs,
                    "focus session accepted"
                );
                Ok(Verdict::Accepted(session))
            }
            Err(rejection) => {
                tracing::debug!(
                    %rejection,
                    start = %candidate.start,
                    end = %candidate.end,
                    "focus candidate rejected"
                );
                Ok(Verdict::Rejected(rejection))
            }
        }
    }
}
