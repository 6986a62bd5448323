// SPDX-License-Identifier: GPL-3.0-only

use rescue_types::{EndReason, ProgressSnapshot, SessionReport, SessionState};
use serde::{Deserialize, Serialize};

use super::RescueError;

/// Outbound notifications from the session controller, delivered in order.
///
/// `StateChanged` is totally ordered with respect to `ProgressUpdated`, and
/// nothing follows `SessionEnded` for the same session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum SessionEvent {
    StateChanged(SessionState),
    ProgressUpdated(ProgressSnapshot),
    /// ddrescue's phase line, or a note from the supervisor
    StatusMessage(String),
    SessionEnded {
        reason: EndReason,
        final_snapshot: Option<ProgressSnapshot>,
        report: Box<SessionReport>,
        error: Option<RescueError>,
    },
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionEnded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_serializes_with_type_tag() {
        let event = SessionEvent::StateChanged(SessionState::Running);
        let json = serde_json::to_string(&event).expect("serialize event");
        assert_eq!(json, r#"{"type":"state_changed","payload":"running"}"#);
        assert!(!event.is_terminal());
    }
}
