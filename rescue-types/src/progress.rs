// SPDX-License-Identifier: GPL-3.0-only

//! Decoded ddrescue progress

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The status-block layouts ddrescue has printed over its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// 1.22 and newer: `bad-sector`, `bad areas`, `pct rescued`
    V122,
    /// 1.21: `errsize`, `errors`, `percent rescued`
    V121,
    /// 1.14 to 1.20: three-line `rescued` / `ipos` / `opos` block
    Legacy,
}

impl OutputLayout {
    /// Candidate order when sniffing an unknown stream, most specific first.
    pub const PRIORITY: [OutputLayout; 3] = [Self::V122, Self::V121, Self::Legacy];
}

impl fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V122 => f.write_str("ddrescue >= 1.22"),
            Self::V121 => f.write_str("ddrescue 1.21"),
            Self::Legacy => f.write_str("ddrescue 1.14-1.20"),
        }
    }
}

/// Which ddrescue pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Copying,
    Trimming,
    Scraping,
    Retrying,
    /// Pre-1.18 name for scraping
    Splitting,
}

impl RecoveryPhase {
    /// Recognise the leading word of a ddrescue status line.
    pub fn from_status_line(line: &str) -> Option<Self> {
        let word = line.split_whitespace().next()?;
        match word {
            "Copying" => Some(Self::Copying),
            "Trimming" => Some(Self::Trimming),
            "Scraping" => Some(Self::Scraping),
            "Retrying" => Some(Self::Retrying),
            "Splitting" => Some(Self::Splitting),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassDirection {
    Forwards,
    Backwards,
}

/// One decoded status block.
///
/// `bytes_rescued <= bytes_attempted <= total_size` holds whenever the total
/// is known. Fields the tool did not print, or printed in a form that could
/// not be decoded, are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressSnapshot {
    pub bytes_attempted: u64,
    pub bytes_rescued: u64,
    pub bytes_bad: u64,

    /// Size announced by the "About to copy" banner
    pub total_size: Option<u64>,

    /// Bytes per second
    pub current_rate: Option<u64>,
    pub average_rate: Option<u64>,

    pub time_remaining: Option<Duration>,

    pub input_offset: Option<u64>,
    pub output_offset: Option<u64>,

    pub pass: Option<u32>,
    pub direction: Option<PassDirection>,
    pub phase: Option<RecoveryPhase>,

    /// Bad areas (1.21+: "bad areas"/"errors")
    pub error_count: Option<u64>,
    pub read_errors: Option<u64>,

    pub run_time: Option<Duration>,
    pub since_last_read: Option<Duration>,

    pub non_tried: Option<u64>,
    pub non_trimmed: Option<u64>,
    pub non_scraped: Option<u64>,

    pub percent_rescued: Option<f64>,

    pub layout: Option<OutputLayout>,

    /// Set once ddrescue has printed its completion line
    pub finished: bool,
}

impl ProgressSnapshot {
    /// Fraction of the input rescued so far, when the total is known.
    pub fn rescued_fraction(&self) -> Option<f64> {
        match self.total_size {
            Some(0) | None => None,
            Some(total) => Some((self.bytes_rescued as f64 / total as f64).clamp(0.0, 1.0)),
        }
    }

    /// True when every byte of a known-size input was read successfully.
    pub fn fully_rescued(&self) -> bool {
        self.total_size
            .is_some_and(|total| total > 0 && self.bytes_rescued >= total)
            && self.bytes_bad == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_is_taken_from_first_word() {
        assert_eq!(
            RecoveryPhase::from_status_line("Copying non-tried blocks... Pass 1 (forwards)"),
            Some(RecoveryPhase::Copying)
        );
        assert_eq!(
            RecoveryPhase::from_status_line("Scraping failed blocks... (forwards)"),
            Some(RecoveryPhase::Scraping)
        );
        assert_eq!(RecoveryPhase::from_status_line("Finished"), None);
    }

    #[test]
    fn rescued_fraction_requires_known_total() {
        let mut snapshot = ProgressSnapshot {
            bytes_rescued: 50,
            ..ProgressSnapshot::default()
        };
        assert_eq!(snapshot.rescued_fraction(), None);

        snapshot.total_size = Some(200);
        assert_eq!(snapshot.rescued_fraction(), Some(0.25));
        assert!(!snapshot.fully_rescued());
    }
}
