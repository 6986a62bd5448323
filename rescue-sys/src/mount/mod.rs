// SPDX-License-Identifier: GPL-3.0-only

//! Platform mount primitives for inspecting rescued output

mod linux;
mod macos;

pub use linux::{DetectedLayout, LinuxMountBackend, parse_kpartx_maps, parse_parted_label};
pub use macos::{MacMountBackend, parse_hdiutil_attach};
