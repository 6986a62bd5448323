// SPDX-License-Identifier: GPL-3.0-only

//! macOS mount primitives built on hdiutil and diskutil

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rescue_contracts::{MountBackend, RescueError, ToolCommand, ToolRunner, VolumeAttachment};
use rescue_types::{AttachmentKind, VolumeChoice};
use serde::Deserialize;
use tracing::info;

use crate::catalog::parse_diskutil_plist;
use crate::error::SysError;

pub struct MacMountBackend {
    runner: Arc<dyn ToolRunner>,
}

#[derive(Debug, Deserialize)]
struct HdiutilAttach {
    #[serde(rename = "system-entities", default)]
    system_entities: Vec<SystemEntity>,
}

#[derive(Debug, Deserialize)]
struct SystemEntity {
    #[serde(rename = "dev-entry")]
    dev_entry: String,
    #[serde(rename = "content-hint")]
    content_hint: Option<String>,
    #[serde(rename = "potentially-mountable", default)]
    potentially_mountable: bool,
}

/// Whole-disk device and mountable volumes from `hdiutil attach -plist`.
pub fn parse_hdiutil_attach(raw: &[u8]) -> crate::Result<(String, Vec<VolumeChoice>)> {
    let attach: HdiutilAttach =
        plist::from_bytes(raw).map_err(|e| SysError::parse("hdiutil", e.to_string()))?;

    let whole_disk = attach
        .system_entities
        .iter()
        .map(|entity| entity.dev_entry.as_str())
        .min_by_key(|dev| dev.len())
        .ok_or_else(|| SysError::parse("hdiutil", "no system entities"))?
        .to_string();

    let volumes = attach
        .system_entities
        .into_iter()
        .filter(|entity| entity.potentially_mountable)
        .filter(|entity| {
            !entity
                .content_hint
                .as_deref()
                .is_some_and(|hint| hint.ends_with("_partition_scheme"))
        })
        .map(|entity| VolumeChoice {
            device: entity.dev_entry,
            filesystem: entity.content_hint,
            size: None,
            label: None,
        })
        .collect();

    Ok((whole_disk, volumes))
}

impl MacMountBackend {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, program: &str, args: &[&str], privileged: bool) -> Result<String, RescueError> {
        let mut command = ToolCommand::new(program, args.iter().copied());
        if privileged {
            command = command.privileged();
        }
        self.runner
            .run_checked(&command)
            .await
            .map_err(|e| RescueError::mount(e.to_string()))
    }
}

#[async_trait]
impl MountBackend for MacMountBackend {
    async fn attach(
        &self,
        output: &Path,
        read_only: bool,
    ) -> Result<VolumeAttachment, RescueError> {
        let path = output.display().to_string();

        if output.starts_with("/dev") {
            let stdout = self.run("diskutil", &["list", "-plist", path.as_str()], false).await?;
            let devices = parse_diskutil_plist(stdout.as_bytes())?;
            let mut volumes: Vec<VolumeChoice> = devices
                .iter()
                .filter(|d| d.parent.is_some())
                .map(|d| VolumeChoice {
                    device: d.identifier.clone(),
                    filesystem: d.filesystem.clone(),
                    size: Some(d.size),
                    label: Some(d.label.clone()).filter(|l| !l.is_empty()),
                })
                .collect();
            if volumes.is_empty() && devices.iter().any(|d| d.partition_table.is_none()) {
                volumes.push(VolumeChoice::new(path));
            }
            return Ok(VolumeAttachment {
                attachment: AttachmentKind::Direct,
                volumes,
                note: None,
            });
        }

        let mut args = vec!["attach", "-nomount", "-plist"];
        if read_only {
            args.push("-readonly");
        }
        args.push(path.as_str());
        let stdout = self.run("hdiutil", &args, false).await?;
        let (device, volumes) = parse_hdiutil_attach(stdout.as_bytes())?;
        info!(image = %path, device = %device, volumes = volumes.len(), "attached disk image");

        Ok(VolumeAttachment {
            attachment: AttachmentKind::Hdiutil { device },
            volumes,
            note: None,
        })
    }

    async fn mount_volume(
        &self,
        volume: &VolumeChoice,
        mount_point: &Path,
        read_only: bool,
    ) -> Result<PathBuf, RescueError> {
        let target = mount_point.display().to_string();
        let mut args = vec!["mount"];
        if read_only {
            args.push("readOnly");
        }
        args.extend(["-mountPoint", target.as_str(), volume.device.as_str()]);

        self.run("diskutil", &args, true).await?;
        info!(volume = %volume.device, mount_point = %target, read_only, "mounted volume");
        Ok(mount_point.to_path_buf())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), RescueError> {
        let target = mount_point.display().to_string();
        let output = self
            .runner
            .run(&ToolCommand::new("diskutil", ["unmount", target.as_str()]))
            .await?;
        if output.success() || output.stderr.contains("not currently mounted") {
            return Ok(());
        }
        Err(RescueError::mount(format!(
            "diskutil unmount {target}: {}",
            output.stderr.trim()
        )))
    }

    async fn detach(&self, attachment: &AttachmentKind) -> Result<(), RescueError> {
        match attachment {
            AttachmentKind::Hdiutil { device } => {
                self.run("hdiutil", &["detach", device.as_str()], false).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn release_device(&self, device: &str) -> Result<(), RescueError> {
        let name = device.strip_prefix("/dev/").unwrap_or(device);
        // diskN is a whole disk; diskNsM is a slice.
        let verb = if name.trim_start_matches("disk").contains('s') {
            "unmount"
        } else {
            "unmountDisk"
        };
        info!(device, "unmounting device before rescue");
        self.run("diskutil", &[verb, device], false).await?;
        Ok(())
    }
}
