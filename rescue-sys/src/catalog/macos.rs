// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use rescue_contracts::{RescueError, ToolCommand, ToolRunner};
use rescue_types::{DeviceDescriptor, DeviceKind, PartitionTableType};
use serde::Deserialize;

use super::{EnumerationStrategy, MountEntry};
use crate::error::SysError;

/// `diskutil list -plist`
pub struct DiskutilPlist;

/// `diskutil list`
pub struct DiskutilText;

#[async_trait]
impl EnumerationStrategy for DiskutilPlist {
    fn name(&self) -> &'static str {
        "diskutil-plist"
    }

    async fn enumerate(
        &self,
        runner: &dyn ToolRunner,
    ) -> Result<Vec<DeviceDescriptor>, RescueError> {
        let stdout = runner
            .run_checked(&ToolCommand::new("diskutil", ["list", "-plist"]))
            .await?;
        Ok(parse_diskutil_plist(stdout.as_bytes())?)
    }
}

#[async_trait]
impl EnumerationStrategy for DiskutilText {
    fn name(&self) -> &'static str {
        "diskutil-text"
    }

    async fn enumerate(
        &self,
        runner: &dyn ToolRunner,
    ) -> Result<Vec<DeviceDescriptor>, RescueError> {
        let stdout = runner
            .run_checked(&ToolCommand::new("diskutil", ["list"]))
            .await?;
        Ok(parse_diskutil_text(&stdout))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskutilList {
    #[serde(default)]
    all_disks_and_partitions: Vec<DiskEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskEntry {
    device_identifier: String,
    #[serde(default)]
    size: u64,
    content: Option<String>,
    volume_name: Option<String>,
    mount_point: Option<String>,
    #[serde(default)]
    partitions: Vec<VolumeEntry>,
    #[serde(rename = "APFSVolumes", default)]
    apfs_volumes: Vec<VolumeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeEntry {
    device_identifier: String,
    #[serde(default)]
    size: u64,
    content: Option<String>,
    volume_name: Option<String>,
    mount_point: Option<String>,
}

/// Parse the property list printed by `diskutil list -plist`.
pub fn parse_diskutil_plist(raw: &[u8]) -> crate::Result<Vec<DeviceDescriptor>> {
    let listing: DiskutilList =
        plist::from_bytes(raw).map_err(|e| SysError::parse("diskutil", e.to_string()))?;

    let mut devices = Vec::new();
    for disk in listing.all_disks_and_partitions {
        let identifier = format!("/dev/{}", disk.device_identifier);
        let mut descriptor = DeviceDescriptor::new(identifier.clone(), DeviceKind::Disk);
        descriptor.size = disk.size;
        descriptor.label = disk.volume_name.clone().unwrap_or_default();
        descriptor.partition_table = disk.content.as_deref().and_then(scheme_to_table);
        if descriptor.partition_table.is_none() {
            descriptor.filesystem = disk.content.clone().filter(|c| !c.is_empty());
        }
        descriptor.mount_point = disk.mount_point.filter(|m| !m.is_empty());
        descriptor.is_mounted = descriptor.mount_point.is_some();

        let volumes: Vec<DeviceDescriptor> = disk
            .partitions
            .into_iter()
            .chain(disk.apfs_volumes)
            .map(|volume| {
                let mut child = DeviceDescriptor::new(
                    format!("/dev/{}", volume.device_identifier),
                    DeviceKind::Partition,
                );
                child.size = volume.size;
                child.label = volume.volume_name.unwrap_or_default();
                child.filesystem = volume.content.filter(|c| !c.is_empty());
                child.mount_point = volume.mount_point.filter(|m| !m.is_empty());
                child.is_mounted = child.mount_point.is_some();
                child.parent = Some(identifier.clone());
                child
            })
            .collect();

        descriptor.children = volumes.iter().map(|v| v.identifier.clone()).collect();
        devices.push(descriptor);
        devices.extend(volumes);
    }

    Ok(devices)
}

/// Parse plain `diskutil list` output.
///
/// ```text
/// /dev/disk0 (internal, physical):
///    #:                       TYPE NAME                    SIZE       IDENTIFIER
///    0:      GUID_partition_scheme                        *500.3 GB   disk0
///    1:                        EFI EFI                     209.7 MB   disk0s1
/// ```
pub fn parse_diskutil_text(raw: &str) -> Vec<DeviceDescriptor> {
    let mut devices: Vec<DeviceDescriptor> = Vec::new();
    let mut current_disk: Option<usize> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("/dev/") {
            let identifier = trimmed.split_whitespace().next().unwrap_or_default();
            let identifier = identifier.trim_end_matches(':').to_string();
            devices.push(DeviceDescriptor::new(identifier, DeviceKind::Disk));
            current_disk = Some(devices.len() - 1);
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            continue;
        };
        let Some(index) = first.strip_suffix(':').and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if tokens.len() < 4 {
            continue;
        }
        let Some(disk_index) = current_disk else {
            continue;
        };

        let name = tokens[tokens.len() - 1];
        let size = parse_si_size(tokens[tokens.len() - 3], tokens[tokens.len() - 2]);
        let description = tokens[1..tokens.len() - 3].join(" ");

        if index == 0 {
            let disk = &mut devices[disk_index];
            disk.size = size.unwrap_or(0);
            disk.partition_table = scheme_to_table(tokens[1]);
            continue;
        }

        let parent = devices[disk_index].identifier.clone();
        let identifier = format!("/dev/{name}");
        devices[disk_index].children.push(identifier.clone());

        let mut child = DeviceDescriptor::new(identifier, DeviceKind::Partition);
        child.size = size.unwrap_or(0);
        child.label = description;
        child.parent = Some(parent);
        devices.push(child);
    }

    devices
}

/// Parse BSD `mount` output: `/dev/disk1s1 on / (apfs, local, journaled)`.
pub fn parse_mount_output(raw: &str) -> Vec<MountEntry> {
    raw.lines()
        .filter_map(|line| {
            let (source, rest) = line.split_once(" on ")?;
            let (target, options) = match rest.rfind(" (") {
                Some(pos) => (&rest[..pos], &rest[pos + 2..]),
                None => (rest, ""),
            };
            let fstype = options
                .trim_end_matches(')')
                .split(',')
                .next()
                .unwrap_or_default()
                .trim();
            Some(MountEntry {
                source: source.trim().to_string(),
                target: target.trim().to_string(),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

fn scheme_to_table(content: &str) -> Option<PartitionTableType> {
    if content.ends_with("_partition_scheme") {
        PartitionTableType::parse(content)
    } else {
        None
    }
}

/// diskutil sizes are decimal: "*500.3 GB", "209.7 MB".
fn parse_si_size(number: &str, unit: &str) -> Option<u64> {
    let value: f64 = number.trim_start_matches('*').parse().ok()?;
    let multiplier = match unit {
        "B" | "Bytes" => 1.0,
        "KB" | "kB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "PB" => 1e15,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKUTIL_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>AllDisksAndPartitions</key>
    <array>
        <dict>
            <key>Content</key>
            <string>FDisk_partition_scheme</string>
            <key>DeviceIdentifier</key>
            <string>disk2</string>
            <key>Partitions</key>
            <array>
                <dict>
                    <key>Content</key>
                    <string>DOS_FAT_32</string>
                    <key>DeviceIdentifier</key>
                    <string>disk2s1</string>
                    <key>MountPoint</key>
                    <string>/Volumes/USB</string>
                    <key>Size</key>
                    <integer>15999999488</integer>
                    <key>VolumeName</key>
                    <string>USB</string>
                </dict>
            </array>
            <key>Size</key>
            <integer>16000000000</integer>
        </dict>
    </array>
</dict>
</plist>"#;

    #[test]
    fn plist_listing_yields_disk_and_partitions() {
        let devices = parse_diskutil_plist(DISKUTIL_PLIST.as_bytes()).expect("valid plist");
        assert_eq!(devices.len(), 2);

        assert_eq!(devices[0].identifier, "/dev/disk2");
        assert_eq!(devices[0].partition_table, Some(PartitionTableType::Msdos));
        assert_eq!(devices[0].children, vec!["/dev/disk2s1"]);

        let volume = &devices[1];
        assert_eq!(volume.label, "USB");
        assert!(volume.is_mounted);
        assert_eq!(volume.parent.as_deref(), Some("/dev/disk2"));
    }

    #[test]
    fn text_listing_reads_scheme_row_and_partitions() {
        let raw = "/dev/disk0 (internal, physical):\n\
                   \x20  #:                       TYPE NAME                    SIZE       IDENTIFIER\n\
                   \x20  0:      GUID_partition_scheme                        *500.3 GB   disk0\n\
                   \x20  1:                        EFI EFI                     209.7 MB   disk0s1\n\
                   \x20  2:                 Apple_APFS Container disk1         500.1 GB   disk0s2\n";
        let devices = parse_diskutil_text(raw);

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].size, 500_300_000_000);
        assert_eq!(devices[0].partition_table, Some(PartitionTableType::Gpt));
        assert_eq!(devices[0].children, vec!["/dev/disk0s1", "/dev/disk0s2"]);
        assert_eq!(devices[2].label, "Apple_APFS Container disk1");
    }

    #[test]
    fn mount_output_splits_source_target_and_type() {
        let entries = parse_mount_output(
            "/dev/disk1s1 on / (apfs, local, journaled)\n/dev/disk2s1 on /Volumes/My USB (msdos, local, nodev)\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].target, "/Volumes/My USB");
        assert_eq!(entries[1].fstype, "msdos");
    }
}
