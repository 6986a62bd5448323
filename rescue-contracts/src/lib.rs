// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{RescueError, RescueErrorKind, SessionEvent};
pub use traits::{
    DeviceCatalog, ExitOutcome, LaunchSpec, MountBackend, ProcessControl, ProcessHandle,
    ProcessRunner, StopSignal, ToolCommand, ToolOutput, ToolRunner, VolumeAttachment,
};
