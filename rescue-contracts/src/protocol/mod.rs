// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod events;

pub use error::{RescueError, RescueErrorKind};
pub use events::SessionEvent;
