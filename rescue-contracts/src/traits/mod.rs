// SPDX-License-Identifier: GPL-3.0-only

pub mod catalog;
pub mod mount;
pub mod process;
pub mod tool;

pub use catalog::DeviceCatalog;
pub use mount::{MountBackend, VolumeAttachment};
pub use process::{ExitOutcome, LaunchSpec, ProcessControl, ProcessHandle, ProcessRunner, StopSignal};
pub use tool::{ToolCommand, ToolOutput, ToolRunner};
