// SPDX-License-Identifier: GPL-3.0-only

//! Plain-text rendering of catalog entries and session events

use rescue_contracts::SessionEvent;
use rescue_types::{
    DeviceDescriptor, DeviceKind, EndReason, MountRecord, PassDirection, ProgressSnapshot,
    RecoveryPhase, SessionReport, bytes_to_pretty, format_duration,
};

fn kind_label(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Disk => "disk",
        DeviceKind::Partition => "part",
        DeviceKind::Loop => "loop",
        DeviceKind::Rom => "rom",
        DeviceKind::Other => "other",
    }
}

fn phase_label(phase: RecoveryPhase) -> &'static str {
    match phase {
        RecoveryPhase::Copying => "copying",
        RecoveryPhase::Trimming => "trimming",
        RecoveryPhase::Scraping => "scraping",
        RecoveryPhase::Retrying => "retrying",
        RecoveryPhase::Splitting => "splitting",
    }
}

/// One row per device; partitions are indented under their disk.
pub fn device_table(devices: &[DeviceDescriptor]) -> String {
    if devices.is_empty() {
        return "No block devices found.\n".to_string();
    }

    let mut out = format!(
        "{:<20} {:<6} {:>12} {:<10} {}\n",
        "DEVICE", "TYPE", "SIZE", "FS", "LABEL / MOUNT"
    );
    for device in devices {
        let name = if device.parent.is_some() {
            format!("  {}", device.name())
        } else {
            device.name().to_string()
        };
        let mut trailing = device.label.clone();
        if let Some(mount_point) = &device.mount_point {
            if !trailing.is_empty() {
                trailing.push(' ');
            }
            trailing.push_str(&format!("[{mount_point}]"));
        }
        out.push_str(&format!(
            "{:<20} {:<6} {:>12} {:<10} {}\n",
            name,
            kind_label(device.kind),
            bytes_to_pretty(device.size, false),
            device.filesystem.as_deref().unwrap_or("-"),
            trailing
        ));
    }
    out
}

pub fn device_details(device: &DeviceDescriptor) -> String {
    let mut lines = vec![
        format!("Device:      {}", device.identifier),
        format!("Type:        {}", kind_label(device.kind)),
        format!("Size:        {}", bytes_to_pretty(device.size, true)),
    ];
    if !device.label.is_empty() {
        lines.push(format!("Label:       {}", device.label));
    }
    if let Some(table) = &device.partition_table {
        lines.push(format!("Partitions:  {table}"));
    }
    if let Some(fs) = &device.filesystem {
        lines.push(format!("Filesystem:  {fs}"));
    }
    match &device.mount_point {
        Some(mount_point) if device.is_mounted => {
            lines.push(format!("Mounted at:  {mount_point}"));
        }
        _ => lines.push("Mounted:     no".to_string()),
    }
    if let Some(parent) = &device.parent {
        lines.push(format!("Parent:      {parent}"));
    }
    if !device.children.is_empty() {
        lines.push(format!("Children:    {}", device.children.join(", ")));
    }
    lines.join("\n") + "\n"
}

/// Single-line progress summary for a status block.
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let mut line = match snapshot.total_size {
        Some(total) => format!(
            "{} / {}",
            bytes_to_pretty(snapshot.bytes_rescued, false),
            bytes_to_pretty(total, false)
        ),
        None => bytes_to_pretty(snapshot.bytes_rescued, false),
    };

    if let Some(percent) = snapshot.percent_rescued {
        line.push_str(&format!(" ({percent:.2}%)"));
    }
    if let Some(phase) = snapshot.phase {
        line.push_str(&format!(" {}", phase_label(phase)));
        if let Some(pass) = snapshot.pass {
            line.push_str(&format!(" pass {pass}"));
        }
        if snapshot.direction == Some(PassDirection::Backwards) {
            line.push_str(" (backwards)");
        }
    }
    if let Some(rate) = snapshot.current_rate {
        line.push_str(&format!(", {}/s", bytes_to_pretty(rate, false)));
    }
    if snapshot.bytes_bad > 0 {
        line.push_str(&format!(", {} bad", bytes_to_pretty(snapshot.bytes_bad, false)));
    }
    if let Some(remaining) = snapshot.time_remaining {
        line.push_str(&format!(", {} left", format_duration(remaining)));
    }
    line
}

fn mount_line(record: &MountRecord) -> String {
    format!(
        "{} mounted {} at {}",
        record.volume.device,
        if record.read_only { "read-only" } else { "read-write" },
        record.mount_point.display()
    )
}

fn report_lines(reason: EndReason, report: &SessionReport) -> Vec<String> {
    let verdict = match reason {
        EndReason::Finished if report.all_recovered => "finished, every byte recovered",
        EndReason::Finished => "finished with unreadable areas",
        EndReason::Paused => "paused, resume with the same map file",
        EndReason::Aborted => "aborted",
        EndReason::Failed => "failed",
    };

    let mut lines = vec![format!("Session {}: {verdict}", report.session_id)];
    let rescued = match report.total_size {
        Some(total) => format!(
            "{} of {}",
            bytes_to_pretty(report.bytes_rescued, true),
            bytes_to_pretty(total, false)
        ),
        None => bytes_to_pretty(report.bytes_rescued, true),
    };
    lines.push(format!("  rescued:  {rescued}"));
    lines.push(format!("  errors:   {}", report.error_count));
    lines.push(format!("  elapsed:  {}", format_duration(report.elapsed)));
    if let Some(code) = report.exit_code {
        lines.push(format!("  exit:     {code}"));
    }
    if let Some(record) = &report.inspection_mount {
        lines.push(format!("  mount:    {}", mount_line(record)));
    }
    if let Some(note) = &report.mount_note {
        lines.push(format!("  mount:    {note}"));
    }
    lines
}

/// Text for one event, or `None` for events the driver does not print.
pub fn event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::StateChanged(state) => Some(format!("-- {state}")),
        SessionEvent::ProgressUpdated(snapshot) => Some(progress_line(snapshot)),
        SessionEvent::StatusMessage(message) if message.trim().is_empty() => None,
        SessionEvent::StatusMessage(message) => Some(format!("   {message}")),
        SessionEvent::SessionEnded {
            reason,
            report,
            error,
            ..
        } => {
            let mut lines = report_lines(*reason, report);
            if let Some(error) = error {
                lines.push(format!("  error:    {error}"));
            }
            Some(lines.join("\n"))
        }
    }
}

pub fn mounted(record: &MountRecord) -> String {
    mount_line(record)
}
