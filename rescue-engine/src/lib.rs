// SPDX-License-Identifier: GPL-3.0-only

//! Recovery engine for the rescue supervisor
//!
//! - [`ProgressStreamParser`] decodes ddrescue's terminal output into
//!   [`rescue_types::ProgressSnapshot`]s.
//! - [`RecoverySessionController`] owns the session state machine and turns
//!   process output and operator commands into ordered
//!   [`rescue_contracts::SessionEvent`]s.
//! - [`MountCoordinator`] attaches and mounts rescued outputs for inspection
//!   and frees host devices before a rescue.
//!
//! Host access goes through the `rescue-contracts` traits; `rescue-sys`
//! provides the real implementations.

pub mod controller;
pub mod mount;
pub mod parser;
pub mod validate;

pub use controller::{ControllerConfig, ControllerParts, RecoverySessionController};
pub use mount::MountCoordinator;
pub use parser::ProgressStreamParser;
pub use validate::validate_options;
