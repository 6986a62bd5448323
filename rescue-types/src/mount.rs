// SPDX-License-Identifier: GPL-3.0-only

//! Mount bookkeeping for recovered images and devices

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A mountable volume exposed by an attached output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeChoice {
    /// Device node to mount (e.g., "/dev/mapper/loop0p1", "/dev/disk4s1")
    pub device: String,

    pub filesystem: Option<String>,

    pub size: Option<u64>,

    pub label: Option<String>,
}

impl VolumeChoice {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            filesystem: None,
            size: None,
            label: None,
        }
    }

    /// Device name without the `/dev/` or `/dev/mapper/` prefix.
    pub fn short_name(&self) -> &str {
        self.device
            .strip_prefix("/dev/mapper/")
            .or_else(|| self.device.strip_prefix("/dev/"))
            .unwrap_or(&self.device)
    }
}

/// How an output was made visible to the mount tooling, and therefore how it
/// has to be released afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttachmentKind {
    /// The output is already a block device; nothing to detach.
    #[default]
    Direct,
    /// A partition image bound to a loop device.
    Loop { device: String },
    /// A whole-disk image whose partitions were mapped with kpartx.
    Kpartx { image: PathBuf },
    /// An LVM physical volume, bound to a loop device when it is an image.
    Lvm {
        loop_device: Option<String>,
        volume_group: String,
    },
    /// A disk image attached with hdiutil.
    Hdiutil { device: String },
}

/// An active inspection mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// The rescue output (image file or device) this mount belongs to
    pub output_path: PathBuf,

    pub volume: VolumeChoice,

    pub mount_point: PathBuf,

    pub read_only: bool,

    pub attachment: AttachmentKind,

    /// A teardown was attempted and failed; the next unmount retries it
    pub cleanup_pending: bool,
}
