// SPDX-License-Identifier: GPL-3.0-only

use rescue_contracts::RescueError;
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Required tool not installed: {0}")]
    ToolMissing(String),

    #[error("Could not parse {tool} output: {message}")]
    Parse { tool: &'static str, message: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl SysError {
    pub fn parse(tool: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            tool,
            message: message.into(),
        }
    }
}

impl From<SysError> for RescueError {
    fn from(error: SysError) -> Self {
        match error {
            SysError::Io(e) => RescueError::Io(e.to_string()),
            SysError::DeviceNotFound(device) => RescueError::NotFound(device),
            SysError::ToolMissing(_) | SysError::PermissionDenied(_) => {
                RescueError::Launch(error.to_string())
            }
            SysError::Parse { .. } => RescueError::Enumeration(error.to_string()),
            SysError::OperationFailed(message) => RescueError::mount(message),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
