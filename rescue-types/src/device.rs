// SPDX-License-Identifier: GPL-3.0-only

//! Block device models
//!
//! A `DeviceDescriptor` is produced fresh by every enumeration and never
//! mutated afterwards. Identity across refreshes is the `identifier` string.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of block device an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Disk,
    Partition,
    Loop,
    Rom,
    #[default]
    Other,
}

impl DeviceKind {
    /// Map the `TYPE` column of lsblk (or a diskutil content hint) onto a kind.
    pub fn from_lsblk_type(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "disk" => Self::Disk,
            "part" | "partition" => Self::Partition,
            "loop" => Self::Loop,
            "rom" => Self::Rom,
            _ => Self::Other,
        }
    }
}

/// Partition table (label) found on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionTableType {
    Gpt,
    Msdos,
    Apple,
    Other(String),
}

impl PartitionTableType {
    /// Parse the scheme names emitted by lsblk (`PTTYPE`), parted and diskutil.
    ///
    /// Returns `None` for empty values and for parted's `loop` pseudo-label,
    /// which means "filesystem directly on the device, no table".
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        match value.to_ascii_lowercase().as_str() {
            "loop" | "none" => None,
            "gpt" | "guid_partition_scheme" => Some(Self::Gpt),
            "dos" | "msdos" | "fdisk_partition_scheme" => Some(Self::Msdos),
            "mac" | "apple_partition_scheme" => Some(Self::Apple),
            _ => Some(Self::Other(value.to_string())),
        }
    }
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt => f.write_str("gpt"),
            Self::Msdos => f.write_str("msdos"),
            Self::Apple => f.write_str("mac"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// One enumerated disk, partition or loop device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Platform device path (e.g., "/dev/sda1", "/dev/disk2s1")
    pub identifier: String,

    /// Size in bytes (0 when the listing tool could not report it)
    pub size: u64,

    /// Vendor/model or volume label, whichever the platform exposes
    pub label: String,

    pub kind: DeviceKind,

    /// Partition table on this device, if it is a whole disk with one
    pub partition_table: Option<PartitionTableType>,

    pub filesystem: Option<String>,

    pub mount_point: Option<String>,

    pub is_mounted: bool,

    /// Identifier of the whole disk for partitions
    pub parent: Option<String>,

    /// Identifiers of partitions on a whole disk
    pub children: Vec<String>,
}

impl DeviceDescriptor {
    pub fn new(identifier: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            identifier: identifier.into(),
            size: 0,
            label: String::new(),
            kind,
            partition_table: None,
            filesystem: None,
            mount_point: None,
            is_mounted: false,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Device name without the `/dev/` prefix.
    pub fn name(&self) -> &str {
        self.identifier
            .strip_prefix("/dev/")
            .unwrap_or(&self.identifier)
    }

    /// True when `query` names this device, either as a full path or a bare name.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        self.identifier == query || self.name() == query.strip_prefix("/dev/").unwrap_or(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_type_parsing_covers_tool_spellings() {
        assert_eq!(PartitionTableType::parse("dos"), Some(PartitionTableType::Msdos));
        assert_eq!(
            PartitionTableType::parse("GUID_partition_scheme"),
            Some(PartitionTableType::Gpt)
        );
        assert_eq!(PartitionTableType::parse("loop"), None);
        assert_eq!(PartitionTableType::parse(""), None);
        assert_eq!(
            PartitionTableType::parse("sun"),
            Some(PartitionTableType::Other("sun".to_string()))
        );
    }

    #[test]
    fn matches_accepts_bare_names() {
        let device = DeviceDescriptor::new("/dev/sdb1", DeviceKind::Partition);
        assert!(device.matches("/dev/sdb1"));
        assert!(device.matches("sdb1"));
        assert!(!device.matches("sdb"));
    }
}
