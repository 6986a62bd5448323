// SPDX-License-Identifier: GPL-3.0-only

//! Host-specific adapter selection, decided once at startup

use std::sync::Arc;

use rescue_contracts::{DeviceCatalog, MountBackend, ToolRunner};

use crate::catalog::{linux_catalog, macos_catalog};
use crate::mount::{LinuxMountBackend, MacMountBackend};

pub fn platform_catalog(runner: Arc<dyn ToolRunner>) -> Arc<dyn DeviceCatalog> {
    if cfg!(target_os = "macos") {
        Arc::new(macos_catalog(runner))
    } else {
        Arc::new(linux_catalog(runner))
    }
}

pub fn platform_mount_backend(runner: Arc<dyn ToolRunner>) -> Arc<dyn MountBackend> {
    if cfg!(target_os = "macos") {
        Arc::new(MacMountBackend::new(runner))
    } else {
        Arc::new(LinuxMountBackend::new(runner))
    }
}
