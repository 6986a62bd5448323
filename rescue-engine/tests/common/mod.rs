// SPDX-License-Identifier: GPL-3.0-only

//! In-memory fakes of the platform traits
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rescue_contracts::{
    DeviceCatalog, ExitOutcome, LaunchSpec, MountBackend, ProcessControl, ProcessHandle,
    ProcessRunner, RescueError, SessionEvent, StopSignal, VolumeAttachment,
};
use rescue_engine::{ControllerConfig, ControllerParts, RecoverySessionController};
use rescue_types::{AttachmentKind, DeviceDescriptor, RescueOptions, VolumeChoice};
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct ProcessState {
    output: Option<mpsc::UnboundedSender<Vec<u8>>>,
    exit: Option<oneshot::Sender<ExitOutcome>>,
    signals: Vec<StopSignal>,
    exit_on_interrupt: Option<i32>,
}

impl ProcessState {
    fn finish(&mut self, outcome: ExitOutcome) {
        self.output = None;
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(outcome);
        }
    }
}

/// A scripted rescue process: tests push output and decide when it exits.
#[derive(Clone)]
pub struct FakeProcess {
    state: Arc<Mutex<ProcessState>>,
}

impl FakeProcess {
    pub fn push(&self, bytes: impl AsRef<[u8]>) {
        let state = self.state.lock().expect("process lock");
        if let Some(output) = &state.output {
            let _ = output.send(bytes.as_ref().to_vec());
        }
    }

    pub fn exit(&self, code: i32) {
        self.state
            .lock()
            .expect("process lock")
            .finish(ExitOutcome::code(code));
    }

    pub fn signals(&self) -> Vec<StopSignal> {
        self.state.lock().expect("process lock").signals.clone()
    }
}

struct FakeControl {
    state: Arc<Mutex<ProcessState>>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn signal(&self, signal: StopSignal) -> Result<(), RescueError> {
        let mut state = self.state.lock().expect("process lock");
        state.signals.push(signal);
        match signal {
            StopSignal::Interrupt => {
                if let Some(code) = state.exit_on_interrupt {
                    state.finish(ExitOutcome::code(code));
                }
            }
            StopSignal::Kill => state.finish(ExitOutcome {
                code: None,
                signal: Some(9),
            }),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRunner {
    processes: Mutex<Vec<FakeProcess>>,
    launches: Mutex<Vec<LaunchSpec>>,
    failure: Option<RescueError>,
    exit_on_interrupt: Option<i32>,
}

impl FakeRunner {
    /// Processes ignore SIGINT until the test makes them exit.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Processes exit with `code` as soon as they are interrupted.
    pub fn exiting_on_interrupt(code: i32) -> Arc<Self> {
        Arc::new(Self {
            exit_on_interrupt: Some(code),
            ..Self::default()
        })
    }

    pub fn failing(error: RescueError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(error),
            ..Self::default()
        })
    }

    pub fn last_process(&self) -> FakeProcess {
        self.processes
            .lock()
            .expect("runner lock")
            .last()
            .cloned()
            .expect("a process was started")
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().expect("runner lock").clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, RescueError> {
        self.launches.lock().expect("runner lock").push(spec.clone());
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(ProcessState {
            output: Some(output_tx),
            exit: Some(exit_tx),
            signals: Vec::new(),
            exit_on_interrupt: self.exit_on_interrupt,
        }));

        self.processes
            .lock()
            .expect("runner lock")
            .push(FakeProcess {
                state: state.clone(),
            });

        Ok(ProcessHandle {
            pid: Some(4242),
            output: output_rx,
            exit: exit_rx,
            control: Arc::new(FakeControl { state }),
        })
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    pub devices: Vec<DeviceDescriptor>,
}

#[async_trait]
impl DeviceCatalog for FakeCatalog {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, RescueError> {
        Ok(self.devices.clone())
    }
}

/// Mount backend that records every call as a readable line.
#[derive(Default)]
pub struct FakeMountBackend {
    pub volumes: Vec<VolumeChoice>,
    calls: Mutex<Vec<String>>,
    busy: AtomicBool,
}

impl FakeMountBackend {
    pub fn with_volumes(devices: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            volumes: devices.iter().map(|d| VolumeChoice::new(*d)).collect(),
            calls: Mutex::new(Vec::new()),
            busy: AtomicBool::new(false),
        })
    }

    /// While set, `unmount` fails as if the filesystem were in use.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl MountBackend for FakeMountBackend {
    async fn attach(&self, output: &Path, read_only: bool) -> Result<VolumeAttachment, RescueError> {
        self.record(format!("attach {} ro={read_only}", output.display()));
        Ok(VolumeAttachment {
            attachment: AttachmentKind::Loop {
                device: "/dev/loop7".to_string(),
            },
            volumes: self.volumes.clone(),
            note: None,
        })
    }

    async fn mount_volume(
        &self,
        volume: &VolumeChoice,
        mount_point: &Path,
        read_only: bool,
    ) -> Result<PathBuf, RescueError> {
        self.record(format!("mount {} ro={read_only}", volume.device));
        Ok(mount_point.to_path_buf())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), RescueError> {
        self.record(format!("unmount {}", mount_point.display()));
        if self.busy.load(Ordering::SeqCst) {
            return Err(RescueError::mount(format!(
                "{}: target is busy",
                mount_point.display()
            )));
        }
        Ok(())
    }

    async fn detach(&self, attachment: &AttachmentKind) -> Result<(), RescueError> {
        if let AttachmentKind::Loop { device } = attachment {
            self.record(format!("detach {device}"));
        }
        Ok(())
    }

    async fn release_device(&self, device: &str) -> Result<(), RescueError> {
        self.record(format!("release {device}"));
        Ok(())
    }
}

pub struct Harness {
    pub controller: RecoverySessionController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub runner: Arc<FakeRunner>,
    pub backend: Arc<FakeMountBackend>,
    pub workdir: tempfile::TempDir,
}

impl Harness {
    pub fn new(runner: Arc<FakeRunner>) -> Self {
        Self::with(runner, FakeMountBackend::with_volumes(&["/dev/loop7"]), |_| {})
    }

    pub fn with(
        runner: Arc<FakeRunner>,
        backend: Arc<FakeMountBackend>,
        configure: impl FnOnce(&mut ControllerConfig),
    ) -> Self {
        let workdir = tempfile::tempdir().expect("temp dir");
        let mut config = ControllerConfig {
            stop_grace: Duration::from_secs(60),
            mount_root: workdir.path().join("mounts"),
            ..ControllerConfig::default()
        };
        configure(&mut config);

        let (controller, events) = RecoverySessionController::spawn(ControllerParts {
            runner: runner.clone(),
            catalog: Arc::new(FakeCatalog::default()),
            mount_backend: backend.clone(),
            config,
        });

        Self {
            controller,
            events,
            runner,
            backend,
            workdir,
        }
    }

    pub fn options(&self) -> RescueOptions {
        RescueOptions::new("/dev/sdz", self.workdir.path().join("disk.img"))
            .with_map_file(self.workdir.path().join("disk.map"))
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    /// Collect events up to and including `SessionEnded`.
    pub async fn events_until_end(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }
}

pub const BANNER: &str = "GNU ddrescue 1.27\n\
Press Ctrl-C to interrupt\n\
About to copy 10485 kBytes from '/dev/sdz' to 'disk.img'\n\
Copying non-tried blocks... Pass 1 (forwards)\n";

/// A ddrescue 1.22+ status block for a 10485 kB input.
pub fn status_block(rescued_kb: u64) -> String {
    let non_tried = 10_485 - rescued_kb;
    let percent = rescued_kb as f64 * 100.0 / 10_485.0;
    format!(
        "     ipos: {rescued_kb:>7} kB, non-trimmed:        0 B,  current rate:    1048 kB/s\n\
              opos: {rescued_kb:>7} kB, non-scraped:        0 B,  average rate:    1048 kB/s\n\
         non-tried: {non_tried:>7} kB,  bad-sector:        0 B,    error rate:       0 B/s\n\
           rescued: {rescued_kb:>7} kB,   bad areas:        0,        run time:          5s\n\
        pct rescued: {percent:>6.2}%, read errors:        0,  remaining time:          2s\n\
                                       time since last successful read:         n/a\n"
    )
}
