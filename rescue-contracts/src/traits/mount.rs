// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use rescue_types::{AttachmentKind, VolumeChoice};

use crate::RescueError;

/// Result of making an output visible to the mount tooling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAttachment {
    pub attachment: AttachmentKind,
    pub volumes: Vec<VolumeChoice>,
    /// Why no volumes were found (e.g. an encrypted container)
    pub note: Option<String>,
}

/// Platform mount primitives. Callers own sequencing and bookkeeping.
#[async_trait]
pub trait MountBackend: Send + Sync {
    /// Attach an image or inspect a device and list the volumes it exposes.
    async fn attach(&self, output: &Path, read_only: bool)
    -> Result<VolumeAttachment, RescueError>;

    /// Mount one volume. Returns the mount point actually used, which may
    /// differ from the requested one on platforms that choose their own.
    async fn mount_volume(
        &self,
        volume: &VolumeChoice,
        mount_point: &Path,
        read_only: bool,
    ) -> Result<PathBuf, RescueError>;

    async fn unmount(&self, mount_point: &Path) -> Result<(), RescueError>;

    /// Undo `attach`. Must tolerate `AttachmentKind::Direct`.
    async fn detach(&self, attachment: &AttachmentKind) -> Result<(), RescueError>;

    /// Unmount a host device so ddrescue can use it exclusively.
    async fn release_device(&self, device: &str) -> Result<(), RescueError>;
}
