// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rescue_contracts::{ExitOutcome, ProcessControl, ProcessRunner, RescueError, SessionEvent};
use rescue_types::{
    EndReason, PrivilegeEscalation, ProgressSnapshot, RescueOptions, SessionId,
    SessionReport, SessionState,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ControllerConfig;
use super::supervisor::{SupervisorMessage, spawn_forwarder, spawn_stop};
use crate::mount::MountCoordinator;
use crate::parser::ProgressStreamParser;
use crate::validate::validate_options;

type Reply<T> = oneshot::Sender<Result<T, RescueError>>;

pub(crate) enum Command {
    Start { options: RescueOptions, reply: Reply<SessionId> },
    Resume { reply: Reply<SessionId> },
    Pause { reply: Reply<()> },
    Abort { reply: Reply<()> },
    LastOutput { reply: Reply<PathBuf> },
    Shutdown { reply: Reply<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopKind {
    Pause,
    Abort,
}

struct ActiveSession {
    id: SessionId,
    options: RescueOptions,
    parser: ProgressStreamParser,
    control: Arc<dyn ProcessControl>,
    stop: Option<StopKind>,
    /// Cancelled once the exit has been observed; stops the kill timer.
    exited: CancellationToken,
    started_at: DateTime<Utc>,
    clock: Instant,
    saw_output: bool,
}

pub(crate) struct SessionActor {
    runner: Arc<dyn ProcessRunner>,
    mounts: Arc<MountCoordinator>,
    config: ControllerConfig,
    state: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    supervisor_tx: mpsc::UnboundedSender<SupervisorMessage>,
    supervisor_rx: mpsc::UnboundedReceiver<SupervisorMessage>,
    session: Option<ActiveSession>,
    /// Options of the last paused session
    resumable: Option<RescueOptions>,
    last_output: Option<PathBuf>,
}

impl SessionActor {
    pub(crate) fn new(
        runner: Arc<dyn ProcessRunner>,
        mounts: Arc<MountCoordinator>,
        config: ControllerConfig,
        state: watch::Sender<SessionState>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        Self {
            runner,
            mounts,
            config,
            state,
            events,
            supervisor_tx,
            supervisor_rx,
            session: None,
            resumable: None,
            last_output: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            // Commands first: a stop request must win over output already queued.
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        if let Err(e) = self.shutdown().await {
                            warn!("teardown after controller drop failed: {e}");
                        }
                        break;
                    }
                },
                Some(message) = self.supervisor_rx.recv() => self.handle_supervisor(message).await,
            }
        }
        debug!("session controller stopped");
    }

    /// Returns false once the controller should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { options, reply } => {
                let result = self.start(options).await;
                let _ = reply.send(result);
            }
            Command::Resume { reply } => {
                let result = match self.resumable.clone() {
                    Some(options) if self.current().accepts_start() => self.start(options).await,
                    _ => Err(RescueError::InvalidState {
                        operation: "resume".to_string(),
                        state: self.current(),
                    }),
                };
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Abort { reply } => {
                let _ = reply.send(self.abort());
            }
            Command::LastOutput { reply } => {
                let result = self.last_output.clone().ok_or_else(|| RescueError::InvalidState {
                    operation: "mount output".to_string(),
                    state: self.current(),
                });
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                let result = self.shutdown().await;
                let _ = reply.send(result);
                return false;
            }
        }
        true
    }

    async fn handle_supervisor(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::Output { session, chunk } => self.on_output(session, &chunk),
            SupervisorMessage::Exited { session, outcome } => self.on_exit(session, outcome).await,
        }
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state changed");
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("no event receiver attached");
        }
    }

    async fn start(&mut self, options: RescueOptions) -> Result<SessionId, RescueError> {
        let state = self.current();
        if !state.accepts_start() {
            return Err(RescueError::SessionBusy { state });
        }
        validate_options(&options)?;

        let id = SessionId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        self.resumable = None;
        self.last_output = Some(options.output.clone());
        self.set_state(SessionState::Starting);

        let launched = match self.release_paths(&options).await {
            Ok(()) => self.runner.start(&self.config.tool.launch_spec(&options)).await,
            Err(e) => Err(e),
        };

        let handle = match launched {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session = %id, "rescue launch failed: {e}");
                let report = SessionReport::from_snapshot(
                    id,
                    options.output.clone(),
                    started_at,
                    clock.elapsed(),
                    None,
                    None,
                );
                self.end(EndReason::Failed, SessionState::Failed, None, report, Some(e.clone()));
                return Err(e);
            }
        };

        info!(
            session = %id,
            pid = ?handle.pid,
            input = %options.input.display(),
            output = %options.output.display(),
            "rescue started"
        );

        let parser = match self.config.layout_hint {
            Some(layout) => ProgressStreamParser::with_layout(layout),
            None => ProgressStreamParser::new(),
        };
        spawn_forwarder(id, handle.output, handle.exit, self.supervisor_tx.clone());

        self.session = Some(ActiveSession {
            id,
            options,
            parser,
            control: handle.control,
            stop: None,
            exited: CancellationToken::new(),
            started_at,
            clock,
            saw_output: false,
        });
        self.set_state(SessionState::Running);
        Ok(id)
    }

    /// Drop our own inspection mounts of the paths, then any host mounts, so
    /// the tool never writes under a mounted filesystem.
    async fn release_paths(&self, options: &RescueOptions) -> Result<(), RescueError> {
        let paths = [options.input.as_path(), options.output.as_path()];
        for path in paths {
            self.mounts.unmount_output(path).await?;
        }
        self.mounts.release_for_rescue(&paths).await
    }

    fn pause(&mut self) -> Result<(), RescueError> {
        let state = self.current();
        if state != SessionState::Running {
            return Err(RescueError::InvalidState {
                operation: "pause".to_string(),
                state,
            });
        }
        self.stop_session(StopKind::Pause);
        self.set_state(SessionState::Pausing);
        Ok(())
    }

    fn abort(&mut self) -> Result<(), RescueError> {
        let state = self.current();
        if !matches!(state, SessionState::Running | SessionState::Pausing) {
            return Err(RescueError::InvalidState {
                operation: "abort".to_string(),
                state,
            });
        }
        self.stop_session(StopKind::Abort);
        self.set_state(SessionState::Aborting);
        Ok(())
    }

    fn stop_session(&mut self, kind: StopKind) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let signalled = session.stop.is_some();
        session.stop = Some(kind);
        info!(session = %session.id, ?kind, "stopping rescue");
        if !signalled {
            spawn_stop(
                session.control.clone(),
                session.exited.clone(),
                self.config.stop_grace,
            );
        }
    }

    fn on_output(&mut self, id: SessionId, chunk: &[u8]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.id != id {
            return;
        }
        session.saw_output = true;

        if session.stop == Some(StopKind::Abort) {
            debug!(bytes = chunk.len(), "discarding output after abort");
            return;
        }

        let snapshots = session.parser.feed(chunk);
        let messages = session.parser.take_messages();
        for message in messages {
            self.emit(SessionEvent::StatusMessage(message));
        }
        for snapshot in snapshots {
            self.emit(SessionEvent::ProgressUpdated(snapshot));
        }
    }

    async fn on_exit(&mut self, id: SessionId, outcome: ExitOutcome) {
        let Some(mut session) = self.session.take_if(|session| session.id == id) else {
            return;
        };
        session.exited.cancel();

        if session.stop != Some(StopKind::Abort) {
            let snapshots = session.parser.finish();
            for message in session.parser.take_messages() {
                self.emit(SessionEvent::StatusMessage(message));
            }
            for snapshot in snapshots {
                self.emit(SessionEvent::ProgressUpdated(snapshot));
            }
        }

        let completed = session.parser.is_completed();
        let last = session.parser.last_snapshot().cloned();
        let mut report = SessionReport::from_snapshot(
            id,
            session.options.output.clone(),
            session.started_at,
            session.clock.elapsed(),
            last.as_ref(),
            outcome.code,
        );

        let (reason, state, error) = match (session.stop, completed, outcome.code) {
            (Some(StopKind::Abort), _, _) => (EndReason::Aborted, SessionState::Idle, None),
            (_, true, Some(0)) => (EndReason::Finished, SessionState::Finished, None),
            (Some(StopKind::Pause), false, _) => {
                self.resumable = Some(session.options.clone());
                (EndReason::Paused, SessionState::Idle, None)
            }
            (_, true, Some(code)) => (
                EndReason::Failed,
                SessionState::Failed,
                Some(RescueError::Process {
                    exit_code: code,
                    message: "ddrescue reported completion but exited with an error".to_string(),
                }),
            ),
            (_, _, Some(code @ (126 | 127)))
                if !session.saw_output
                    && self.config.tool.escalation != PrivilegeEscalation::None =>
            {
                (
                    EndReason::Failed,
                    SessionState::Failed,
                    Some(RescueError::Launch(format!(
                        "privilege escalation was refused or failed (exit code {code})"
                    ))),
                )
            }
            (_, _, code) => (
                EndReason::Failed,
                SessionState::Failed,
                Some(RescueError::UnexpectedTermination {
                    exit_code: code,
                    last_snapshot: last.clone().map(Box::new),
                }),
            ),
        };

        // Mounts taken while the tool ran never outlive the run.
        if let Err(e) = self.mounts.unmount_output(&session.options.output).await {
            warn!(session = %id, "output still mounted after rescue: {e}");
            report.mount_note = Some(e.to_string());
        }

        if reason == EndReason::Finished
            && self.config.auto_mount_on_finish
            && report.mount_note.is_none()
        {
            match self
                .mounts
                .mount_output(&session.options.output, true, None)
                .await
            {
                Ok(record) => report.inspection_mount = Some(record),
                Err(e) => {
                    info!(session = %id, "output not mounted after rescue: {e}");
                    report.mount_note = Some(e.to_string());
                }
            }
        }

        info!(
            session = %id,
            ?reason,
            exit_code = ?outcome.code,
            signal = ?outcome.signal,
            bytes_rescued = report.bytes_rescued,
            "rescue ended"
        );
        self.end(reason, state, last, report, error);
    }

    fn end(
        &self,
        reason: EndReason,
        state: SessionState,
        final_snapshot: Option<ProgressSnapshot>,
        report: SessionReport,
        error: Option<RescueError>,
    ) {
        self.set_state(state);
        self.emit(SessionEvent::SessionEnded {
            reason,
            final_snapshot,
            report: Box::new(report),
            error,
        });
    }

    async fn shutdown(&mut self) -> Result<(), RescueError> {
        if self.session.is_some() {
            if self.current() != SessionState::Aborting {
                self.stop_session(StopKind::Abort);
                self.set_state(SessionState::Aborting);
            }
            while self.session.is_some() {
                match self.supervisor_rx.recv().await {
                    Some(message) => self.handle_supervisor(message).await,
                    None => break,
                }
            }
        }
        self.mounts.unmount_all().await
    }
}
