// SPDX-License-Identifier: GPL-3.0-only

//! Inspection mounts for rescue outputs
//!
//! The coordinator owns every [`MountRecord`] it creates. Work on a given
//! output path is serialized through a per-path async mutex so a mount and an
//! unmount of the same image never interleave.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rescue_contracts::{DeviceCatalog, MountBackend, RescueError, VolumeAttachment};
use rescue_types::{AttachmentKind, MountRecord, SessionState, VolumeChoice};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info, warn};

type Slot = Arc<AsyncMutex<Option<MountRecord>>>;

pub struct MountCoordinator {
    catalog: Arc<dyn DeviceCatalog>,
    backend: Arc<dyn MountBackend>,
    session_state: watch::Receiver<SessionState>,
    mount_root: PathBuf,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl MountCoordinator {
    pub fn new(
        catalog: Arc<dyn DeviceCatalog>,
        backend: Arc<dyn MountBackend>,
        session_state: watch::Receiver<SessionState>,
        mount_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            backend,
            session_state,
            mount_root: mount_root.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, output: &Path) -> Slot {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(output.to_path_buf()).or_default().clone()
    }

    fn all_slots(&self) -> Vec<Slot> {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.values().cloned().collect()
    }

    /// Current mount for an output, if any.
    pub async fn record(&self, output: &Path) -> Option<MountRecord> {
        self.slot(output).lock().await.clone()
    }

    /// Mount the output for inspection.
    ///
    /// An existing mount of the same output is returned as is. Read-only is
    /// forced while a rescue session is live. With several candidate volumes
    /// `selection` must name one of them (device path or short name);
    /// otherwise the choices come back inside `RescueError::Mount`.
    pub async fn mount_output(
        &self,
        output: &Path,
        read_only: bool,
        selection: Option<&str>,
    ) -> Result<MountRecord, RescueError> {
        let slot = self.slot(output);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_ref() {
            debug!(output = %output.display(), "output already mounted");
            return Ok(existing.clone());
        }

        let state = *self.session_state.borrow();
        let read_only = if state.is_active() && !read_only {
            info!(%state, "forcing read-only mount while a session is live");
            true
        } else {
            read_only
        };

        let VolumeAttachment {
            attachment,
            volumes,
            note,
        } = self.backend.attach(output, read_only).await?;

        let volume = match pick_volume(&volumes, selection) {
            Ok(volume) => volume,
            Err(e) => {
                if let Some(note) = &note {
                    info!(output = %output.display(), "{note}");
                }
                self.detach_quietly(&attachment).await;
                return Err(match e {
                    RescueError::NoMountableVolume(_) => RescueError::NoMountableVolume(
                        note.unwrap_or_else(|| output.display().to_string()),
                    ),
                    other => other,
                });
            }
        };

        let mount_point = mount_point_for(&self.mount_root, output);
        if let Err(e) = tokio::fs::create_dir_all(&mount_point).await {
            self.detach_quietly(&attachment).await;
            return Err(RescueError::mount(format!(
                "cannot create {}: {e}",
                mount_point.display()
            )));
        }

        let mount_point = match self
            .backend
            .mount_volume(&volume, &mount_point, read_only)
            .await
        {
            Ok(actual) => actual,
            Err(e) => {
                self.detach_quietly(&attachment).await;
                let _ = tokio::fs::remove_dir(&mount_point).await;
                return Err(e);
            }
        };

        let record = MountRecord {
            output_path: output.to_path_buf(),
            volume,
            mount_point,
            read_only,
            attachment,
            cleanup_pending: false,
        };
        info!(
            output = %output.display(),
            volume = %record.volume.device,
            mount_point = %record.mount_point.display(),
            read_only,
            "output mounted for inspection"
        );

        *guard = Some(record.clone());
        Ok(record)
    }

    /// Unmount and detach. Unmounting something already gone is a no-op.
    pub async fn unmount(&self, record: &MountRecord) -> Result<(), RescueError> {
        self.unmount_output(&record.output_path).await
    }

    pub async fn unmount_output(&self, output: &Path) -> Result<(), RescueError> {
        let slot = self.slot(output);
        let mut guard = slot.lock().await;
        let Some(record) = guard.as_mut() else {
            debug!(output = %output.display(), "nothing mounted");
            return Ok(());
        };

        let released = match self.backend.unmount(&record.mount_point).await {
            Ok(()) => self.backend.detach(&record.attachment).await,
            Err(e) => Err(e),
        };
        if let Err(e) = released {
            // Kept so a later unmount retries the teardown.
            warn!(output = %output.display(), "inspection mount teardown failed: {e}");
            record.cleanup_pending = true;
            return Err(e);
        }
        if let Err(e) = tokio::fs::remove_dir(&record.mount_point).await {
            debug!(mount_point = %record.mount_point.display(), "mount point left in place: {e}");
        }

        info!(output = %output.display(), "inspection mount released");
        *guard = None;
        Ok(())
    }

    /// Release every mount this coordinator made, continuing past failures.
    pub async fn unmount_all(&self) -> Result<(), RescueError> {
        let mut first_error = None;

        for slot in self.all_slots() {
            let output = match slot.lock().await.as_ref() {
                Some(record) => record.output_path.clone(),
                None => continue,
            };
            if let Err(e) = self.unmount_output(&output).await {
                warn!(output = %output.display(), "failed to release mount: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unmount the host devices behind `paths` so the rescue tool gets
    /// exclusive access. Paths the catalog does not know (image files) are
    /// skipped, as is the whole step when enumeration fails.
    pub async fn release_for_rescue(&self, paths: &[&Path]) -> Result<(), RescueError> {
        let devices = match self.catalog.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("cannot check device mounts before rescue: {e}");
                return Ok(());
            }
        };

        for path in paths {
            let query = path.display().to_string();
            let Some(device) = devices.iter().find(|device| device.matches(&query)) else {
                continue;
            };

            let mut targets: Vec<&str> = device
                .children
                .iter()
                .filter_map(|child| devices.iter().find(|d| &d.identifier == child))
                .filter(|child| child.is_mounted)
                .map(|child| child.identifier.as_str())
                .collect();
            if device.is_mounted {
                targets.push(device.identifier.as_str());
            }

            for target in targets {
                info!(device = target, "releasing mounted device before rescue");
                self.backend.release_device(target).await?;
            }
        }

        Ok(())
    }

    async fn detach_quietly(&self, attachment: &AttachmentKind) {
        if let Err(e) = self.backend.detach(attachment).await {
            warn!("failed to detach after aborted mount: {e}");
        }
    }
}

/// `<root>/<stem>-<hash of the full path>`, so equally named outputs in
/// different directories never share a mount point.
fn mount_point_for(root: &Path, output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let mut hasher = DefaultHasher::new();
    output.hash(&mut hasher);
    root.join(format!("{stem}-{:08x}", hasher.finish() as u32))
}

fn pick_volume(
    volumes: &[VolumeChoice],
    selection: Option<&str>,
) -> Result<VolumeChoice, RescueError> {
    match (volumes, selection) {
        ([], _) => Err(RescueError::NoMountableVolume(String::new())),
        ([only], None) => Ok(only.clone()),
        (_, Some(wanted)) => volumes
            .iter()
            .find(|v| v.device == wanted || v.short_name() == wanted)
            .cloned()
            .ok_or_else(|| RescueError::Mount {
                reason: format!("no volume named {wanted}"),
                choices: volumes.to_vec(),
            }),
        (_, None) => Err(RescueError::Mount {
            reason: format!("{} volumes found; choose one", volumes.len()),
            choices: volumes.to_vec(),
        }),
    }
}
