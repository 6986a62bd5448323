// SPDX-License-Identifier: GPL-3.0-only

//! Block device enumeration
//!
//! A catalog runs an ordered list of strategies (structured output first,
//! plain text second) and keeps the first that succeeds. Mount state is then
//! reconciled against the live mount table, since listing tools may lag
//! behind mounts made moments earlier.

mod linux;
mod macos;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rescue_contracts::{DeviceCatalog, RescueError, ToolCommand, ToolRunner};
use rescue_types::DeviceDescriptor;
use tracing::{debug, info, warn};

pub use linux::{LsblkJson, LsblkPairs, parse_lsblk_json, parse_lsblk_pairs, parse_proc_mounts};
pub use macos::{
    DiskutilPlist, DiskutilText, parse_diskutil_plist, parse_diskutil_text, parse_mount_output,
};

#[async_trait]
pub trait EnumerationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enumerate(&self, runner: &dyn ToolRunner)
    -> Result<Vec<DeviceDescriptor>, RescueError>;
}

/// One line of the host mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
}

/// Where the live mount table is read from
#[derive(Debug, Clone)]
pub enum MountTableSource {
    /// A procfs-style table (`/proc/self/mounts`)
    File(PathBuf),
    /// Output of the BSD `mount` command
    MountCommand,
}

impl MountTableSource {
    async fn load(&self, runner: &dyn ToolRunner) -> Result<Vec<MountEntry>, RescueError> {
        match self {
            Self::File(path) => {
                let contents = tokio::fs::read_to_string(path).await?;
                Ok(parse_proc_mounts(&contents))
            }
            Self::MountCommand => {
                let stdout = runner
                    .run_checked(&ToolCommand::new("mount", Vec::<String>::new()))
                    .await?;
                Ok(parse_mount_output(&stdout))
            }
        }
    }
}

pub struct FallbackCatalog {
    runner: Arc<dyn ToolRunner>,
    strategies: Vec<Box<dyn EnumerationStrategy>>,
    mount_table: MountTableSource,
}

impl FallbackCatalog {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        strategies: Vec<Box<dyn EnumerationStrategy>>,
        mount_table: MountTableSource,
    ) -> Self {
        Self {
            runner,
            strategies,
            mount_table,
        }
    }
}

/// lsblk JSON, then lsblk key/value pairs, reconciled with `/proc/self/mounts`.
pub fn linux_catalog(runner: Arc<dyn ToolRunner>) -> FallbackCatalog {
    FallbackCatalog::new(
        runner,
        vec![Box::new(LsblkJson), Box::new(LsblkPairs)],
        MountTableSource::File(PathBuf::from("/proc/self/mounts")),
    )
}

/// `diskutil list -plist`, then plain `diskutil list`, reconciled with `mount`.
pub fn macos_catalog(runner: Arc<dyn ToolRunner>) -> FallbackCatalog {
    FallbackCatalog::new(
        runner,
        vec![Box::new(DiskutilPlist), Box::new(DiskutilText)],
        MountTableSource::MountCommand,
    )
}

#[async_trait]
impl DeviceCatalog for FallbackCatalog {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, RescueError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.enumerate(self.runner.as_ref()).await {
                Ok(mut devices) => {
                    match self.mount_table.load(self.runner.as_ref()).await {
                        Ok(entries) => reconcile_mounts(&mut devices, &entries),
                        Err(e) => warn!("mount table unavailable, keeping tool-reported mounts: {e}"),
                    }
                    info!(
                        strategy = strategy.name(),
                        count = devices.len(),
                        "enumerated block devices"
                    );
                    return Ok(devices);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), "enumeration strategy failed: {e}");
                    failures.push(format!("{}: {e}", strategy.name()));
                }
            }
        }

        if failures.is_empty() {
            return Err(RescueError::Enumeration(
                "no enumeration strategy configured".to_string(),
            ));
        }
        Err(RescueError::Enumeration(failures.join("; ")))
    }
}

/// Overlay the live mount table onto enumerated devices.
pub fn reconcile_mounts(devices: &mut [DeviceDescriptor], entries: &[MountEntry]) {
    for device in devices.iter_mut() {
        if let Some(entry) = entries.iter().find(|entry| entry.source == device.identifier) {
            debug!(device = %device.identifier, target = %entry.target, "device is mounted");
            device.mount_point = Some(entry.target.clone());
            if device.filesystem.is_none() && !entry.fstype.is_empty() {
                device.filesystem = Some(entry.fstype.clone());
            }
        }
        device.is_mounted = device.mount_point.is_some();
    }
}
