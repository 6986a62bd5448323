// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use rescue_types::PrivilegeEscalation;

use crate::RescueError;

/// A fully resolved command line for the rescue tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub escalation: PrivilegeEscalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT; ddrescue flushes its map file and exits
    Interrupt,
    /// SIGKILL
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    /// Terminating signal, when the process did not exit normally
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Deliver a signal. Signalling a process that already exited is `Ok`.
    async fn signal(&self, signal: StopSignal) -> Result<(), RescueError>;
}

/// A running rescue process.
///
/// `output` yields raw merged stdout/stderr chunks verbatim and closes once
/// both pipes are drained; `exit` resolves only after that.
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
    pub exit: oneshot::Receiver<ExitOutcome>,
    pub control: Arc<dyn ProcessControl>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Spawn without a shell. Fails with `RescueError::Launch` when the
    /// program or the escalation helper is missing.
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, RescueError>;
}
