// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the rescue tool and privileged helpers gain root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeEscalation {
    /// Run directly; the supervisor already has the rights it needs.
    #[default]
    None,
    /// Linux policy framework (`pkexec`).
    Pkexec,
    /// macOS admin prompt through `sudo -A` and an askpass helper.
    SudoAskpass,
}

impl PrivilegeEscalation {
    /// Helper binary and the arguments that precede the wrapped command.
    pub fn prefix(self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            Self::None => None,
            Self::Pkexec => Some(("pkexec", &[])),
            Self::SudoAskpass => Some(("sudo", &["-A", "--"])),
        }
    }
}

/// Everything a single ddrescue run is started with.
///
/// Frozen once a session starts; pause/resume reuses the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RescueOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub map_file: Option<PathBuf>,

    /// `-R`: read the input backwards
    pub reverse: bool,
    /// `-p`: preallocate space on the output before copying
    pub preallocate: bool,
    /// `-n`: skip the scraping phase
    pub no_split: bool,
    /// `-d`: bypass the kernel cache on the input
    pub direct_disk_access: bool,
    /// `-r`: retry bad sectors, `max_retries` times (unbounded when unset)
    pub retry_bad_sectors: bool,
    /// `-f`: allow overwriting an output device
    pub force_overwrite: bool,

    /// `-c`: sectors copied per read
    pub cluster_size: Option<u32>,
    pub max_retries: Option<u32>,
    /// `-e`: give up after this many bad areas
    pub max_errors: Option<u64>,
    /// `-E`: give up when bad areas grow faster than this many bytes/s
    pub max_error_rate: Option<u64>,
    /// `-b`: input sector size
    pub input_block_size: Option<u32>,
    /// `-s`: bytes to copy; needed where ddrescue cannot size a raw device
    pub input_size: Option<u64>,
}

impl RescueOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_map_file(mut self, map_file: impl Into<PathBuf>) -> Self {
        self.map_file = Some(map_file.into());
        self
    }

    /// True when the output is a device node rather than an image file.
    pub fn output_is_device(&self) -> bool {
        self.output.starts_with("/dev")
    }
}
