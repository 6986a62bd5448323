// SPDX-License-Identifier: GPL-3.0-only

//! Status-block layouts and their decoding into snapshots

use std::time::Duration;

use rescue_types::{OutputLayout, ProgressSnapshot};

use super::fields::{parse_count, parse_duration, parse_percent, parse_size};

/// Ordered `(label, value)` pairs of one status block
pub(crate) type Block = Vec<(String, String)>;

fn value<'a>(block: &'a Block, label: &str) -> Option<&'a str> {
    block
        .iter()
        .find(|(name, _)| name == label)
        .map(|(_, value)| value.as_str())
}

fn has(block: &Block, label: &str) -> bool {
    block.iter().any(|(name, _)| name == label)
}

fn required(layout: OutputLayout) -> &'static [&'static str] {
    match layout {
        OutputLayout::V122 => &["ipos", "rescued", "pct rescued", "bad-sector"],
        OutputLayout::V121 => &["ipos", "rescued", "percent rescued", "errsize", "non-tried"],
        OutputLayout::Legacy => &["ipos", "rescued", "errsize", "errors"],
    }
}

/// Labels that rule a layout out even when its required labels are present.
fn excluded(layout: OutputLayout) -> &'static [&'static str] {
    match layout {
        OutputLayout::V122 => &[],
        OutputLayout::V121 => &["bad-sector"],
        OutputLayout::Legacy => &["non-tried", "pct rescued", "percent rescued"],
    }
}

/// The label on the last line of a block.
fn terminal(layout: OutputLayout) -> &'static str {
    match layout {
        OutputLayout::V122 | OutputLayout::V121 => "time since last successful read",
        OutputLayout::Legacy => "opos",
    }
}

pub(crate) fn matches(layout: OutputLayout, block: &Block) -> bool {
    required(layout).iter().all(|label| has(block, label))
        && !excluded(layout).iter().any(|label| has(block, label))
}

pub(crate) fn is_complete(layout: OutputLayout, block: &Block) -> bool {
    matches(layout, block) && has(block, terminal(layout))
}

/// Decode a matched block. `base` carries what the stream has established
/// outside the block (total size, phase, pass); undecodable fields stay `None`.
pub(crate) fn decode(layout: OutputLayout, block: &Block, base: &ProgressSnapshot) -> ProgressSnapshot {
    let size = |label: &str| value(block, label).and_then(parse_size);
    let count = |label: &str| value(block, label).and_then(parse_count);
    let duration = |label: &str| value(block, label).and_then(parse_duration);

    let mut snapshot = ProgressSnapshot {
        layout: Some(layout),
        finished: false,
        input_offset: size("ipos"),
        output_offset: size("opos"),
        non_tried: size("non-tried"),
        non_trimmed: size("non-trimmed"),
        non_scraped: size("non-scraped"),
        current_rate: size("current rate"),
        average_rate: size("average rate"),
        run_time: duration("run time"),
        time_remaining: duration("remaining time"),
        read_errors: count("read errors"),
        ..base.clone()
    };

    snapshot.bytes_rescued = size("rescued").unwrap_or(0);
    snapshot.bytes_bad = match layout {
        OutputLayout::V122 => size("bad-sector"),
        OutputLayout::V121 | OutputLayout::Legacy => size("errsize"),
    }
    .unwrap_or(0);
    snapshot.error_count = match layout {
        OutputLayout::V122 => count("bad areas"),
        OutputLayout::V121 | OutputLayout::Legacy => count("errors"),
    };
    snapshot.since_last_read = duration("time since last successful read")
        .or_else(|| duration("time from last successful read"))
        .or_else(|| duration("successful read"));
    snapshot.percent_rescued = value(block, "pct rescued")
        .or_else(|| value(block, "percent rescued"))
        .and_then(parse_percent);

    snapshot.bytes_attempted = match (snapshot.total_size, snapshot.non_tried) {
        (Some(total), Some(non_tried)) => total.saturating_sub(non_tried),
        _ => snapshot
            .bytes_rescued
            .saturating_add(snapshot.bytes_bad)
            .saturating_add(snapshot.non_trimmed.unwrap_or(0))
            .saturating_add(snapshot.non_scraped.unwrap_or(0)),
    };

    // Figures are rounded to the display unit, so keep them ordered.
    snapshot.bytes_attempted = snapshot.bytes_attempted.max(snapshot.bytes_rescued);
    if let Some(total) = snapshot.total_size {
        snapshot.bytes_attempted = snapshot.bytes_attempted.min(total);
        snapshot.bytes_rescued = snapshot.bytes_rescued.min(snapshot.bytes_attempted);
    }

    if let Some(total) = snapshot.total_size.filter(|total| *total > 0) {
        if snapshot.percent_rescued.is_none() {
            let share = snapshot.bytes_rescued as f64 * 100.0 / total as f64;
            snapshot.percent_rescued = Some(share.min(100.0));
        }
        // Legacy blocks print no remaining time.
        if !has(block, "remaining time") {
            let untried = total.saturating_sub(snapshot.bytes_attempted);
            snapshot.time_remaining = snapshot
                .average_rate
                .and_then(|rate| remaining_at_rate(untried, rate));
        }
    }

    snapshot
}

/// Whole seconds to read `untried` bytes at `rate` bytes per second.
fn remaining_at_rate(untried: u64, rate: u64) -> Option<Duration> {
    match (untried, rate) {
        (0, _) => Some(Duration::ZERO),
        (_, 0) => None,
        _ => Some(Duration::from_secs(untried.div_ceil(rate))),
    }
}
