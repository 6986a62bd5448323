// SPDX-License-Identifier: GPL-3.0-only

//! Label/value splitting and lenient value decoding

use std::time::Duration;

/// Every label ddrescue has printed in a status block, across versions.
const KNOWN_LABELS: &[&str] = &[
    "ipos",
    "opos",
    "non-tried",
    "non-trimmed",
    "non-scraped",
    "rescued",
    "bad-sector",
    "bad areas",
    "pct rescued",
    "percent rescued",
    "read errors",
    "current rate",
    "average rate",
    "error rate",
    "run time",
    "remaining time",
    "time since last successful read",
    "time from last successful read",
    "successful read",
    "errsize",
    "errors",
];

pub(crate) fn is_known_label(label: &str) -> bool {
    KNOWN_LABELS.contains(&label)
}

/// Split a status line into `(label, value)` pairs.
///
/// Fields are separated by a comma followed by whitespace (so thousands
/// separators survive) or by runs of two or more spaces. Returns `None` when
/// the line carries no recognised label.
pub(crate) fn split_fields(line: &str) -> Option<Vec<(String, String)>> {
    let mut fields: Vec<(String, String)> = Vec::new();

    for piece in split_on_comma_space(line) {
        for token in split_on_wide_space(piece) {
            match token.split_once(':') {
                Some((label, value)) => {
                    fields.push((label.trim().to_lowercase(), value.trim().to_string()));
                }
                None => {
                    // A token without a colon continues the previous value.
                    if let Some((_, value)) = fields.last_mut() {
                        if !value.is_empty() {
                            value.push(' ');
                        }
                        value.push_str(token);
                    }
                }
            }
        }
    }

    if fields.iter().any(|(label, _)| is_known_label(label)) {
        Some(fields)
    } else {
        None
    }
}

fn split_on_comma_space(line: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let bytes = line.as_bytes();

    for (index, &byte) in bytes.iter().enumerate() {
        if byte == b','
            && bytes
                .get(index + 1)
                .is_some_and(|next| next.is_ascii_whitespace())
        {
            pieces.push(&line[start..index]);
            start = index + 1;
        }
    }
    pieces.push(&line[start..]);
    pieces
}

fn split_on_wide_space(piece: &str) -> Vec<&str> {
    piece
        .split("  ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Decode a byte size or rate: `1,048 kB`, `3 MiB`, `512 B/s`, `10 MBytes`.
pub(crate) fn parse_size(value: &str) -> Option<u64> {
    let cleaned = value.trim().trim_end_matches("/s").replace(',', "");
    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split);
    let number: f64 = number.parse().ok()?;

    let unit = unit.trim();
    let unit = unit.strip_suffix("ytes").unwrap_or(unit);
    let multiplier: f64 = match unit {
        "" | "B" => 1.0,
        "k" | "kB" | "KB" => 1e3,
        "M" | "MB" => 1e6,
        "G" | "GB" => 1e9,
        "T" | "TB" => 1e12,
        "P" | "PB" => 1e15,
        "E" | "EB" => 1e18,
        "Ki" | "KiB" => 1024.0,
        "Mi" | "MiB" => 1024f64.powi(2),
        "Gi" | "GiB" => 1024f64.powi(3),
        "Ti" | "TiB" => 1024f64.powi(4),
        "Pi" | "PiB" => 1024f64.powi(5),
        "Ei" | "EiB" => 1024f64.powi(6),
        _ => return None,
    };

    Some((number * multiplier).round() as u64)
}

/// Decode a plain count, tolerating thousands separators.
pub(crate) fn parse_count(value: &str) -> Option<u64> {
    value.trim().replace(',', "").parse().ok()
}

/// Decode a percentage such as `99.97%`.
pub(crate) fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}

/// Decode a duration: `1d 2h 3m 4s`, `35 s`, `0 s ago`. `n/a` is unknown.
pub(crate) fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let value = value.strip_suffix("ago").unwrap_or(value).trim();
    if value.is_empty() || value.eq_ignore_ascii_case("n/a") {
        return None;
    }

    let mut total = 0u64;
    let mut number = String::new();
    let mut matched = false;

    for c in value.chars() {
        match c {
            '0'..='9' => number.push(c),
            ' ' => {}
            'd' | 'h' | 'm' | 's' => {
                let amount: u64 = number.parse().ok()?;
                number.clear();
                let scale = match c {
                    'd' => 86_400,
                    'h' => 3_600,
                    'm' => 60,
                    _ => 1,
                };
                total = total.checked_add(amount.checked_mul(scale)?)?;
                matched = true;
            }
            _ => return None,
        }
    }

    if !number.is_empty() {
        total = total.checked_add(number.parse().ok()?)?;
        matched = true;
    }

    matched.then(|| Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(fields: &'a [(String, String)], label: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn comma_space_and_wide_space_separate_fields() {
        let fields = split_fields(
            "     ipos:    1,048 kB, non-trimmed:        0 B,  current rate:  1048 kB/s",
        )
        .expect("status line");
        assert_eq!(field(&fields, "ipos"), Some("1,048 kB"));
        assert_eq!(field(&fields, "non-trimmed"), Some("0 B"));
        assert_eq!(field(&fields, "current rate"), Some("1048 kB/s"));
    }

    #[test]
    fn trailing_field_without_comma_is_split_on_wide_space() {
        let fields = split_fields("percent rescued: 0.30%   time since last successful read: n/a")
            .expect("status line");
        assert_eq!(field(&fields, "percent rescued"), Some("0.30%"));
        assert_eq!(field(&fields, "time since last successful read"), Some("n/a"));
    }

    #[test]
    fn lines_without_known_labels_are_not_fields() {
        assert!(split_fields("Copying non-tried blocks... Pass 1 (forwards)").is_none());
        assert!(split_fields("ddrescue: Can't open input file: No such file").is_none());
    }

    #[test]
    fn sizes_accept_si_iec_and_rates() {
        assert_eq!(parse_size("1,048 kB"), Some(1_048_000));
        assert_eq!(parse_size("3 MiB"), Some(3 * 1024 * 1024));
        assert_eq!(parse_size("512 B/s"), Some(512));
        assert_eq!(parse_size("10 MBytes"), Some(10_000_000));
        assert_eq!(parse_size("1.5 GB"), Some(1_500_000_000));
        assert_eq!(parse_size("0"), Some(0));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("4 furlongs"), None);
    }

    #[test]
    fn durations_accept_compound_and_spaced_forms() {
        assert_eq!(parse_duration("1d 2h 3m 4s"), Some(Duration::from_secs(93_784)));
        assert_eq!(parse_duration("35 s"), Some(Duration::from_secs(35)));
        assert_eq!(parse_duration("0 s ago"), Some(Duration::ZERO));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("n/a"), None);
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn counts_and_percentages() {
        assert_eq!(parse_count("1,024"), Some(1024));
        assert_eq!(parse_count("-"), None);
        assert_eq!(parse_percent("99.97%"), Some(99.97));
        assert_eq!(parse_percent("100 %"), Some(100.0));
    }
}
