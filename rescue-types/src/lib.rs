// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the rescue supervisor
//!
//! This crate defines the value types shared across the stack:
//!
//! - **rescue-sys**: Produces `DeviceDescriptor`s and `MountRecord` attachments
//!   from platform tooling
//! - **rescue-engine**: Produces `ProgressSnapshot`s and drives `SessionState`
//! - **rescue-service**: Renders these types for the operator
//!
//! Every type here is immutable once handed out. Devices are re-enumerated
//! rather than updated, and a session's options are frozen when it starts.

pub mod common;
pub mod device;
pub mod mount;
pub mod options;
pub mod progress;
pub mod session;

pub use common::{bytes_to_pretty, format_duration};
pub use device::{DeviceDescriptor, DeviceKind, PartitionTableType};
pub use mount::{AttachmentKind, MountRecord, VolumeChoice};
pub use options::{PrivilegeEscalation, RescueOptions};
pub use progress::{OutputLayout, PassDirection, ProgressSnapshot, RecoveryPhase};
pub use session::{EndReason, SessionId, SessionReport, SessionState};
