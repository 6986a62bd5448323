// SPDX-License-Identifier: GPL-3.0-only

//! Privileged rescue process management
//!
//! ddrescue is spawned directly (no shell) behind pkexec or `sudo -A`.
//! Both pipes are drained by dedicated reader tasks into one channel, and the
//! exit status is published only after both readers hit end-of-file, so a
//! consumer always sees every byte before it sees the exit.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rescue_contracts::{
    ExitOutcome, LaunchSpec, ProcessControl, ProcessHandle, ProcessRunner, RescueError, StopSignal,
};
use rescue_types::PrivilegeEscalation;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::{render, resolve_invocation, tool_available};

const READ_CHUNK: usize = 4096;

/// Spawns the rescue tool on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivilegedProcessRunner;

impl PrivilegedProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for PrivilegedProcessRunner {
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, RescueError> {
        if !tool_available(&spec.program) {
            return Err(RescueError::Launch(format!(
                "{} is not installed or not on PATH",
                spec.program
            )));
        }

        let (program, args) = resolve_invocation(spec.escalation, &spec.program, &spec.args);
        if program != spec.program && !tool_available(&program) {
            return Err(RescueError::Launch(format!(
                "privilege escalation helper {program} is not installed"
            )));
        }

        info!(command = %render(&program, &args), "launching rescue tool");
        let mut child = Command::new(&program)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RescueError::Launch(format!("failed to spawn {program}: {e}")))?;

        let pid = child.id();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, output_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, output_tx.clone())));
        }
        drop(output_tx);

        let exited = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = oneshot::channel();
        let exited_flag = exited.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            exited_flag.store(true, Ordering::SeqCst);
            for reader in readers {
                let _ = reader.await;
            }

            let outcome = match status {
                Ok(status) => ExitOutcome {
                    code: status.code(),
                    signal: status.signal(),
                },
                Err(e) => {
                    warn!("failed to collect rescue tool exit status: {e}");
                    ExitOutcome::default()
                }
            };
            debug!(?outcome, "rescue tool exited");
            let _ = exit_tx.send(outcome);
        });

        Ok(ProcessHandle {
            pid,
            output: output_rx,
            exit: exit_rx,
            control: Arc::new(ChildControl {
                pid,
                escalation: spec.escalation,
                exited,
            }),
        })
    }
}

async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("rescue tool pipe read failed: {e}");
                break;
            }
        }
    }
}

struct ChildControl {
    pid: Option<u32>,
    escalation: PrivilegeEscalation,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessControl for ChildControl {
    async fn signal(&self, signal: StopSignal) -> Result<(), RescueError> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let (nix_signal, name) = match signal {
            StopSignal::Interrupt => (Signal::SIGINT, "INT"),
            StopSignal::Kill => (Signal::SIGKILL, "KILL"),
        };

        match kill(Pid::from_raw(pid as i32), nix_signal) {
            Ok(()) | Err(Errno::ESRCH) => {
                debug!(pid, signal = name, "signalled rescue tool");
                Ok(())
            }
            Err(Errno::EPERM) => self.signal_escalated(pid, name).await,
            Err(errno) => Err(RescueError::Io(format!(
                "failed to send SIG{name} to {pid}: {errno}"
            ))),
        }
    }
}

impl ChildControl {
    /// The tool runs as root; deliver the signal through the same helper.
    async fn signal_escalated(&self, pid: u32, name: &str) -> Result<(), RescueError> {
        let args = vec!["-s".to_string(), name.to_string(), pid.to_string()];
        let (program, args) = resolve_invocation(self.escalation, "kill", &args);
        info!(command = %render(&program, &args), "signalling privileged rescue tool");

        let status = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await?;

        if status.success() || self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        Err(RescueError::Process {
            exit_code: status.code().unwrap_or(-1),
            message: format!("could not deliver SIG{name} to {pid}"),
        })
    }
}
