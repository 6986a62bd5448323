// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the rescue supervisor
//!
//! This crate wraps the host tooling the engine depends on:
//! - Block device enumeration (lsblk on Linux, diskutil on macOS)
//! - Launching and signalling ddrescue under pkexec / sudo
//! - ddrescue version detection and command-line construction
//! - Attaching and mounting recovered images (kpartx/losetup, hdiutil)
//!
//! Everything is exposed through the `rescue-contracts` traits so the engine
//! can be driven by fakes in tests.

pub mod catalog;
pub mod command;
pub mod ddrescue;
pub mod error;
pub mod mount;
pub mod platform;
pub mod process;

#[cfg(test)]
mod testing;

pub use catalog::{FallbackCatalog, linux_catalog, macos_catalog};
pub use command::SystemToolRunner;
pub use ddrescue::{HostPlatform, ToolSettings, ToolVersion, build_arguments, detect_version};
pub use error::{Result, SysError};
pub use mount::{LinuxMountBackend, MacMountBackend};
pub use platform::{platform_catalog, platform_mount_backend};
pub use process::PrivilegedProcessRunner;
