// SPDX-License-Identifier: GPL-3.0-only

//! Per-session tasks between the rescue process and the controller

use std::sync::Arc;
use std::time::Duration;

use rescue_contracts::{ExitOutcome, ProcessControl, StopSignal};
use rescue_types::SessionId;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) enum SupervisorMessage {
    Output { session: SessionId, chunk: Vec<u8> },
    Exited { session: SessionId, outcome: ExitOutcome },
}

/// Forward every output chunk, then the exit status, over one ordered
/// channel so the controller never sees the exit before the output.
pub(crate) fn spawn_forwarder(
    session: SessionId,
    mut output: mpsc::UnboundedReceiver<Vec<u8>>,
    exit: oneshot::Receiver<ExitOutcome>,
    sender: mpsc::UnboundedSender<SupervisorMessage>,
) {
    tokio::spawn(async move {
        while let Some(chunk) = output.recv().await {
            if sender
                .send(SupervisorMessage::Output { session, chunk })
                .is_err()
            {
                debug!(%session, "controller gone, dropping process output");
                return;
            }
        }

        let outcome = match exit.await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%session, "exit status was lost; treating as abnormal termination");
                ExitOutcome::default()
            }
        };
        let _ = sender.send(SupervisorMessage::Exited { session, outcome });
    });
}

/// Interrupt the process, then kill it if it has not exited within `grace`.
/// `exited` is cancelled by the controller once the exit has been observed.
pub(crate) fn spawn_stop(
    control: Arc<dyn ProcessControl>,
    exited: CancellationToken,
    grace: Duration,
) {
    tokio::spawn(async move {
        if let Err(e) = control.signal(StopSignal::Interrupt).await {
            warn!("failed to interrupt rescue process: {e}");
        }

        tokio::select! {
            _ = exited.cancelled() => {}
            _ = tokio::time::sleep(grace) => {
                warn!(?grace, "rescue process ignored the interrupt; killing it");
                if let Err(e) = control.signal(StopSignal::Kill).await {
                    warn!("failed to kill rescue process: {e}");
                }
            }
        }
    });
}
