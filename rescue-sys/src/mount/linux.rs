// SPDX-License-Identifier: GPL-3.0-only

//! Linux mount primitives: parted layout check, losetup/kpartx attach, LVM activation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rescue_contracts::{MountBackend, RescueError, ToolCommand, ToolRunner, VolumeAttachment};
use rescue_types::{AttachmentKind, DeviceKind, VolumeChoice};
use tracing::{debug, info, warn};

use crate::catalog::parse_lsblk_json;

/// What parted (and friends) found on an output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedLayout {
    /// A filesystem directly on the image or device (parted reports `loop`)
    Filesystem,
    /// A partition table of the given scheme
    PartitionTable(String),
    Luks,
    LvmPhysicalVolume,
    Unknown,
}

pub struct LinuxMountBackend {
    runner: Arc<dyn ToolRunner>,
}

impl LinuxMountBackend {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    async fn privileged(&self, program: &str, args: &[&str]) -> Result<String, RescueError> {
        self.runner
            .run_checked(&ToolCommand::new(program, args.iter().copied()).privileged())
            .await
            .map_err(|e| RescueError::mount(e.to_string()))
    }

    async fn detect_layout(&self, path: &str) -> DetectedLayout {
        let parted = self
            .runner
            .run(&ToolCommand::new("parted", ["-m", "-s", path, "unit", "B", "print"]).privileged())
            .await;

        if let Ok(output) = &parted
            && output.success()
            && let Some(label) = parse_parted_label(&output.stdout)
        {
            return if label == "loop" {
                DetectedLayout::Filesystem
            } else {
                DetectedLayout::PartitionTable(label)
            };
        }

        if let Ok(output) = self
            .runner
            .run(&ToolCommand::new("cryptsetup", ["isLuks", path]).privileged())
            .await
            && output.success()
        {
            return DetectedLayout::Luks;
        }

        if let Ok(output) = self
            .runner
            .run(&ToolCommand::new("file", ["-s", "-L", path]).privileged())
            .await
            && output.stdout.contains("LVM")
        {
            return DetectedLayout::LvmPhysicalVolume;
        }

        DetectedLayout::Unknown
    }

    async fn attach_loop(&self, image: &str, read_only: bool) -> Result<String, RescueError> {
        let mut args = vec!["--find", "--show"];
        if read_only {
            args.push("--read-only");
        }
        args.push(image);
        let stdout = self.privileged("losetup", &args).await?;
        let device = stdout.trim().to_string();
        if device.is_empty() {
            return Err(RescueError::mount(format!(
                "losetup returned no loop device for {image}"
            )));
        }
        Ok(device)
    }

    async fn device_partitions(&self, device: &str) -> Result<Vec<VolumeChoice>, RescueError> {
        // A stale kernel view of the table would hide new partitions.
        if let Err(e) = self.privileged("partprobe", &[device]).await {
            debug!("partprobe {device} failed: {e}");
        }

        let stdout = self
            .runner
            .run_checked(&ToolCommand::new(
                "lsblk",
                ["-J", "-b", "-o", "NAME,PATH,SIZE,TYPE,LABEL,FSTYPE", device],
            ))
            .await?;
        let devices = parse_lsblk_json(&stdout)?;

        Ok(devices
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Partition)
            .map(|d| VolumeChoice {
                device: d.identifier,
                filesystem: d.filesystem,
                size: Some(d.size),
                label: Some(d.label).filter(|l| !l.is_empty()),
            })
            .collect())
    }

    async fn activate_lvm(
        &self,
        physical_volume: &str,
        loop_device: Option<String>,
    ) -> Result<VolumeAttachment, RescueError> {
        let pvs = self
            .privileged("pvs", &["--noheadings", "-o", "vg_name", physical_volume])
            .await?;
        let Some(volume_group) = pvs.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(VolumeAttachment {
                attachment: loop_device
                    .map(|device| AttachmentKind::Loop { device })
                    .unwrap_or_default(),
                volumes: Vec::new(),
                note: Some("LVM physical volume does not belong to a volume group".to_string()),
            });
        };
        let volume_group = volume_group.to_string();

        self.privileged("vgchange", &["-a", "y", volume_group.as_str()]).await?;
        let lvs = self
            .privileged("lvs", &["--noheadings", "-o", "lv_path", volume_group.as_str()])
            .await?;

        Ok(VolumeAttachment {
            attachment: AttachmentKind::Lvm {
                loop_device,
                volume_group,
            },
            volumes: parse_lv_paths(&lvs),
            note: None,
        })
    }
}

#[async_trait]
impl MountBackend for LinuxMountBackend {
    async fn attach(
        &self,
        output: &Path,
        read_only: bool,
    ) -> Result<VolumeAttachment, RescueError> {
        let path = output.display().to_string();
        let is_device = output.starts_with("/dev");
        let layout = self.detect_layout(&path).await;
        info!(output = %path, ?layout, "inspected rescue output");

        match (layout, is_device) {
            (DetectedLayout::Luks, _) => Ok(VolumeAttachment {
                attachment: AttachmentKind::Direct,
                volumes: Vec::new(),
                note: Some("output is an encrypted LUKS container".to_string()),
            }),
            (DetectedLayout::PartitionTable(_), true) => Ok(VolumeAttachment {
                attachment: AttachmentKind::Direct,
                volumes: self.device_partitions(&path).await?,
                note: None,
            }),
            (DetectedLayout::PartitionTable(_), false) => {
                let flags = if read_only { "-avr" } else { "-av" };
                let stdout = self.privileged("kpartx", &[flags, path.as_str()]).await?;
                Ok(VolumeAttachment {
                    attachment: AttachmentKind::Kpartx {
                        image: output.to_path_buf(),
                    },
                    volumes: parse_kpartx_maps(&stdout),
                    note: None,
                })
            }
            (DetectedLayout::LvmPhysicalVolume, true) => self.activate_lvm(&path, None).await,
            (DetectedLayout::LvmPhysicalVolume, false) => {
                let loop_device = self.attach_loop(&path, read_only).await?;
                let attached = self
                    .activate_lvm(&loop_device, Some(loop_device.clone()))
                    .await;
                if attached.is_err()
                    && let Err(e) = self.privileged("losetup", &["-d", loop_device.as_str()]).await
                {
                    warn!("failed to release {loop_device}: {e}");
                }
                attached
            }
            // Let mount(8) decide whether an unrecognised image holds a filesystem.
            (DetectedLayout::Filesystem | DetectedLayout::Unknown, true) => Ok(VolumeAttachment {
                attachment: AttachmentKind::Direct,
                volumes: vec![VolumeChoice::new(path)],
                note: None,
            }),
            (DetectedLayout::Filesystem | DetectedLayout::Unknown, false) => {
                let device = self.attach_loop(&path, read_only).await?;
                Ok(VolumeAttachment {
                    attachment: AttachmentKind::Loop {
                        device: device.clone(),
                    },
                    volumes: vec![VolumeChoice::new(device)],
                    note: None,
                })
            }
        }
    }

    async fn mount_volume(
        &self,
        volume: &VolumeChoice,
        mount_point: &Path,
        read_only: bool,
    ) -> Result<PathBuf, RescueError> {
        let target = mount_point.display().to_string();
        let mut args = Vec::with_capacity(3);
        if read_only {
            args.push("-r");
        }
        args.push(volume.device.as_str());
        args.push(target.as_str());

        self.privileged("mount", &args).await?;
        info!(volume = %volume.device, mount_point = %target, read_only, "mounted volume");
        Ok(mount_point.to_path_buf())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), RescueError> {
        let target = mount_point.display().to_string();
        let output = self
            .runner
            .run(&ToolCommand::new("umount", [target.as_str()]).privileged())
            .await?;
        if output.success() || output.stderr.contains("not mounted") {
            return Ok(());
        }
        Err(RescueError::mount(format!(
            "umount {target}: {}",
            output.stderr.trim()
        )))
    }

    async fn detach(&self, attachment: &AttachmentKind) -> Result<(), RescueError> {
        match attachment {
            AttachmentKind::Direct | AttachmentKind::Hdiutil { .. } => Ok(()),
            AttachmentKind::Loop { device } => {
                self.privileged("losetup", &["-d", device.as_str()]).await?;
                Ok(())
            }
            AttachmentKind::Kpartx { image } => {
                let image = image.display().to_string();
                self.privileged("kpartx", &["-d", image.as_str()]).await?;
                Ok(())
            }
            AttachmentKind::Lvm {
                loop_device,
                volume_group,
            } => {
                self.privileged("vgchange", &["-a", "n", volume_group.as_str()]).await?;
                if let Some(device) = loop_device {
                    self.privileged("losetup", &["-d", device.as_str()]).await?;
                }
                Ok(())
            }
        }
    }

    async fn release_device(&self, device: &str) -> Result<(), RescueError> {
        info!(device, "unmounting device before rescue");
        self.unmount(Path::new(device)).await
    }
}

/// Read the partition-table label from `parted -m print`.
///
/// The second line describes the device: `path:size:transport:lss:pss:label:model:;`
pub fn parse_parted_label(output: &str) -> Option<String> {
    let line = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .nth(1)?;
    let label = line.trim_end_matches(';').split(':').nth(5)?.trim();
    if label.is_empty() || label == "unknown" {
        return None;
    }
    Some(label.to_string())
}

/// Read mapped partitions from `kpartx -av`: `add map loop0p1 (253:0): 0 2048 linear 7:0 2048`.
pub fn parse_kpartx_maps(output: &str) -> Vec<VolumeChoice> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            if tokens.next()? != "add" || tokens.next()? != "map" {
                return None;
            }
            let name = tokens.next()?;
            let sectors = line
                .split("):")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().nth(1))
                .and_then(|s| s.parse::<u64>().ok());

            let mut choice = VolumeChoice::new(format!("/dev/mapper/{name}"));
            choice.size = sectors.map(|s| s * 512);
            Some(choice)
        })
        .collect()
}

fn parse_lv_paths(output: &str) -> Vec<VolumeChoice> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(VolumeChoice::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedRunner, failed, ok};

    const PARTED_MSDOS: &str = "BYT;\n/srv/disk.img:8589934592B:file:512:512:msdos::;\n1:1048576B:8589934591B:8588886016B:ext4::;\n";
    const PARTED_LOOP: &str = "BYT;\n/srv/part.img:1073741824B:file:512:512:loop::;\n1:0B:1073741823B:1073741824B:ext4::;\n";

    #[test]
    fn parted_label_distinguishes_tables_from_bare_filesystems() {
        assert_eq!(parse_parted_label(PARTED_MSDOS).as_deref(), Some("msdos"));
        assert_eq!(parse_parted_label(PARTED_LOOP).as_deref(), Some("loop"));
        assert_eq!(parse_parted_label("BYT;\n"), None);
    }

    #[test]
    fn kpartx_maps_become_mapper_devices() {
        let volumes = parse_kpartx_maps(
            "add map loop0p1 (253:0): 0 204800 linear 7:0 2048\nadd map loop0p2 (253:1): 0 409600 linear 7:0 206848\n",
        );
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].device, "/dev/mapper/loop0p1");
        assert_eq!(volumes[0].size, Some(204_800 * 512));
        assert_eq!(volumes[1].short_name(), "loop0p2");
    }

    #[tokio::test]
    async fn partitioned_image_is_mapped_with_kpartx() {
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("parted", ok(PARTED_MSDOS)),
            ("kpartx", ok("add map loop3p1 (253:4): 0 16775168 linear 7:3 2048\n")),
        ]));
        let backend = LinuxMountBackend::new(runner.clone());

        let attached = backend
            .attach(Path::new("/srv/disk.img"), true)
            .await
            .expect("kpartx attach");

        assert_eq!(
            attached.attachment,
            AttachmentKind::Kpartx {
                image: PathBuf::from("/srv/disk.img")
            }
        );
        assert_eq!(attached.volumes.len(), 1);
        assert!(runner.calls().contains(&"kpartx -avr /srv/disk.img".to_string()));
    }

    #[tokio::test]
    async fn luks_image_has_no_volumes() {
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("parted", failed("unrecognised disk label")),
            ("cryptsetup", ok("")),
        ]));
        let backend = LinuxMountBackend::new(runner);

        let attached = backend
            .attach(Path::new("/srv/crypt.img"), true)
            .await
            .expect("layout check succeeds");
        assert!(attached.volumes.is_empty());
        assert!(attached.note.is_some_and(|n| n.contains("LUKS")));
    }

    #[tokio::test]
    async fn unmount_tolerates_already_unmounted_targets() {
        let runner = Arc::new(ScriptedRunner::new(vec![(
            "umount",
            failed("umount: /tmp/x: not mounted."),
        )]));
        let backend = LinuxMountBackend::new(runner);
        backend
            .unmount(Path::new("/tmp/x"))
            .await
            .expect("not mounted is fine");
    }
}
