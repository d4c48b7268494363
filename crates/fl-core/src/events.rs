//! Outbound notifications for UI and notification layers.

use crate::session::{AppSession, FocusSession};

/// Receives detection results.
///
/// Both methods default to doing nothing so sinks can subscribe to one kind.
pub trait EventSink {
    /// A focus session was validated and stored.
    fn on_focus_session_detected(&self, _session: &FocusSession) {}

    /// An app usage session was recorded.
    fn on_app_usage_detected(&self, _session: &AppSession) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_focus_session_detected(&self, session: &FocusSession) {
        tracing::info!(
            start = %session.start_time,
            end = %session.end_time,
            duration_secs = session.duration_secs,
            "focus session detected"
        );
    }

    fn on_app_usage_detected(&self, session: &AppSession) {
        tracing::info!(
            app_id = %session.app_id,
            start = %session.start_time,
            duration_secs = session.duration_secs,
            tag = ?session.scene_tag_id,
            "app usage recorded"
        );
    }
}
