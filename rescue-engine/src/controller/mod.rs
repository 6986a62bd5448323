// SPDX-License-Identifier: GPL-3.0-only

//! Recovery session control
//!
//! A single actor task owns the [`SessionState`] and serializes every
//! transition. Callers talk to it through [`RecoverySessionController`],
//! a cheap cloneable handle; observers read the state from a `watch` channel
//! and receive [`SessionEvent`]s, in order, on an unbounded channel.

mod actor;
mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rescue_contracts::{DeviceCatalog, MountBackend, ProcessRunner, RescueError, SessionEvent};
use rescue_sys::ToolSettings;
use rescue_types::{MountRecord, OutputLayout, RescueOptions, SessionId, SessionState};
use tokio::sync::{mpsc, oneshot, watch};

use crate::mount::MountCoordinator;
use actor::{Command, SessionActor};

/// Engine-side settings that are fixed for the controller's lifetime
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tool: ToolSettings,
    /// How long an interrupted process gets before it is killed
    pub stop_grace: Duration,
    /// Mount the output read-only once a session finishes
    pub auto_mount_on_finish: bool,
    pub mount_root: PathBuf,
    /// Output layout implied by the detected tool version
    pub layout_hint: Option<OutputLayout>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tool: ToolSettings::default(),
            stop_grace: Duration::from_secs(5),
            auto_mount_on_finish: false,
            mount_root: PathBuf::from("/tmp/rescue-supervisor/mounts"),
            layout_hint: None,
        }
    }
}

/// Platform services the controller drives
pub struct ControllerParts {
    pub runner: Arc<dyn ProcessRunner>,
    pub catalog: Arc<dyn DeviceCatalog>,
    pub mount_backend: Arc<dyn MountBackend>,
    pub config: ControllerConfig,
}

#[derive(Clone)]
pub struct RecoverySessionController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    mounts: Arc<MountCoordinator>,
}

impl RecoverySessionController {
    /// Spawn the controller task. Must be called inside a tokio runtime.
    pub fn spawn(parts: ControllerParts) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mounts = Arc::new(MountCoordinator::new(
            parts.catalog,
            parts.mount_backend,
            state_rx.clone(),
            parts.config.mount_root.clone(),
        ));

        let actor = SessionActor::new(
            parts.runner,
            mounts.clone(),
            parts.config,
            state_tx,
            event_tx,
        );
        tokio::spawn(actor.run(command_rx));

        let controller = Self {
            commands: command_tx,
            state: state_rx,
            mounts,
        };
        (controller, event_rx)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, RescueError>>) -> Command,
    ) -> Result<T, RescueError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| RescueError::ChannelClosed)?;
        response.await.map_err(|_| RescueError::ChannelClosed)?
    }

    /// Validate the options, release the devices involved, and launch the
    /// tool. Fails with `SessionBusy` while a session is live.
    pub async fn start(&self, options: RescueOptions) -> Result<SessionId, RescueError> {
        self.request(|reply| Command::Start { options, reply }).await
    }

    /// Restart the last paused session with the same options and map file.
    pub async fn resume(&self) -> Result<SessionId, RescueError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Interrupt the running tool; the session can be resumed afterwards.
    pub async fn pause(&self) -> Result<(), RescueError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Stop the running tool and discard any progress still in flight.
    pub async fn abort(&self) -> Result<(), RescueError> {
        self.request(|reply| Command::Abort { reply }).await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn mount_coordinator(&self) -> Arc<MountCoordinator> {
        self.mounts.clone()
    }

    async fn last_output(&self) -> Result<PathBuf, RescueError> {
        self.request(|reply| Command::LastOutput { reply }).await
    }

    /// Mount the most recent session's output read-only for inspection.
    pub async fn mount_output(&self, selection: Option<&str>) -> Result<MountRecord, RescueError> {
        let output = self.last_output().await?;
        self.mounts.mount_output(&output, true, selection).await
    }

    pub async fn unmount_output(&self) -> Result<(), RescueError> {
        let output = self.last_output().await?;
        self.mounts.unmount_output(&output).await
    }

    /// Mount an arbitrary output, outside of any session.
    pub async fn mount_path(
        &self,
        output: &Path,
        selection: Option<&str>,
    ) -> Result<MountRecord, RescueError> {
        self.mounts.mount_output(output, true, selection).await
    }

    /// Abort any live session, wait for the tool to exit, and release every
    /// mount. The controller task ends afterwards.
    pub async fn shutdown(&self) -> Result<(), RescueError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
