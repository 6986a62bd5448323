// SPDX-License-Identifier: GPL-3.0-only

//! Formatting helpers shared by the engine logs and the driver output

use std::time::Duration;

use num_format::{Locale, ToFormattedString};

const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Convert bytes to a human-readable binary size (e.g., "1.50 GiB").
///
/// With `add_bytes` the exact byte count is appended with thousands separators.
pub fn bytes_to_pretty(bytes: u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val = bytes as f64;

    while val >= 1024. && steps < UNITS.len() - 1 {
        val /= 1024.;
        steps += 1;
    }

    let pretty = if steps == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", val, UNITS[steps])
    };

    if add_bytes && steps > 0 {
        format!("{} ({} bytes)", pretty, bytes.to_formatted_string(&Locale::en))
    } else {
        pretty
    }
}

/// Render a duration the way ddrescue prints remaining time ("1h 2m 5s").
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_sizes_use_binary_steps() {
        assert_eq!(bytes_to_pretty(512, true), "512 B");
        assert_eq!(bytes_to_pretty(1536, false), "1.50 KiB");
        assert_eq!(
            bytes_to_pretty(10 * 1024 * 1024, true),
            "10.00 MiB (10,485,760 bytes)"
        );
    }

    #[test]
    fn durations_skip_empty_components() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(614)), "10m 14s");
        assert_eq!(format_duration(Duration::from_secs(3_720)), "1h 2m");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }
}
