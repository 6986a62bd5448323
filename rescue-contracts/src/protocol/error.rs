// SPDX-License-Identifier: GPL-3.0-only

use rescue_types::{ProgressSnapshot, SessionState, VolumeChoice};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescueErrorKind {
    InvalidInput,
    NotFound,
    PermissionDenied,
    Busy,
    Unavailable,
    Failed,
    Internal,
}

impl RescueErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::PermissionDenied => 403,
            Self::Busy => 423,
            Self::Unavailable => 503,
            Self::Failed => 502,
            Self::Internal => 500,
        }
    }
}

/// Every failure the engine reports to its caller.
///
/// Cloneable and serializable so it can travel inside `SessionEvent`s.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "error", content = "detail")]
pub enum RescueError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("could not launch rescue tool: {0}")]
    Launch(String),

    #[error("process exited with code {exit_code}: {message}")]
    Process { exit_code: i32, message: String },

    #[error("a recovery session is already {state}")]
    SessionBusy { state: SessionState },

    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: String,
        state: SessionState,
    },

    #[error("mount failed: {reason}")]
    Mount {
        reason: String,
        /// Volumes the caller may pick from when the layout was ambiguous
        choices: Vec<VolumeChoice>,
    },

    #[error("no mountable volume found on {0}")]
    NoMountableVolume(String),

    #[error("rescue tool terminated unexpectedly (exit code {exit_code:?})")]
    UnexpectedTermination {
        exit_code: Option<i32>,
        last_snapshot: Option<Box<ProgressSnapshot>>,
    },

    #[error("invalid rescue options: {0}")]
    InvalidOptions(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("session controller is no longer running")]
    ChannelClosed,
}

impl RescueError {
    pub fn kind(&self) -> RescueErrorKind {
        match self {
            Self::InvalidOptions(_) => RescueErrorKind::InvalidInput,
            Self::NotFound(_) | Self::NoMountableVolume(_) => RescueErrorKind::NotFound,
            Self::SessionBusy { .. } | Self::InvalidState { .. } => RescueErrorKind::Busy,
            Self::Launch(_) => RescueErrorKind::PermissionDenied,
            Self::Enumeration(_) | Self::ChannelClosed => RescueErrorKind::Unavailable,
            Self::Process { .. } | Self::UnexpectedTermination { .. } | Self::Mount { .. } => {
                RescueErrorKind::Failed
            }
            Self::Io(_) => RescueErrorKind::Internal,
        }
    }

    pub fn mount(reason: impl Into<String>) -> Self {
        Self::Mount {
            reason: reason.into(),
            choices: Vec::new(),
        }
    }
}

impl From<std::io::Error> for RescueError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
