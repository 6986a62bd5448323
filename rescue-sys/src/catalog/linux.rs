// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use rescue_contracts::{RescueError, ToolCommand, ToolRunner};
use rescue_types::{DeviceDescriptor, DeviceKind, PartitionTableType};
use serde::Deserialize;

use super::{EnumerationStrategy, MountEntry};
use crate::error::SysError;

const JSON_COLUMNS: &str = "NAME,PATH,SIZE,TYPE,MODEL,VENDOR,LABEL,FSTYPE,MOUNTPOINT,PTTYPE";
// PATH only exists in util-linux 2.33+, so the text fallback derives it from NAME.
const PAIR_COLUMNS: &str = "NAME,SIZE,TYPE,MODEL,LABEL,FSTYPE,MOUNTPOINT,PTTYPE,PKNAME";

/// `lsblk -J -b`
pub struct LsblkJson;

/// `lsblk -P -b`
pub struct LsblkPairs;

#[async_trait]
impl EnumerationStrategy for LsblkJson {
    fn name(&self) -> &'static str {
        "lsblk-json"
    }

    async fn enumerate(
        &self,
        runner: &dyn ToolRunner,
    ) -> Result<Vec<DeviceDescriptor>, RescueError> {
        let stdout = runner
            .run_checked(&ToolCommand::new("lsblk", ["-J", "-b", "-o", JSON_COLUMNS]))
            .await?;
        Ok(parse_lsblk_json(&stdout)?)
    }
}

#[async_trait]
impl EnumerationStrategy for LsblkPairs {
    fn name(&self) -> &'static str {
        "lsblk-pairs"
    }

    async fn enumerate(
        &self,
        runner: &dyn ToolRunner,
    ) -> Result<Vec<DeviceDescriptor>, RescueError> {
        let stdout = runner
            .run_checked(&ToolCommand::new("lsblk", ["-P", "-b", "-o", PAIR_COLUMNS]))
            .await?;
        Ok(parse_lsblk_pairs(&stdout))
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    path: Option<String>,
    // Older lsblk prints sizes as strings even with -b.
    size: Option<serde_json::Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    model: Option<String>,
    vendor: Option<String>,
    label: Option<String>,
    fstype: Option<String>,
    mountpoint: Option<String>,
    pttype: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Parse `lsblk -J` into a flat list, parents before their children.
pub fn parse_lsblk_json(raw: &str) -> crate::Result<Vec<DeviceDescriptor>> {
    let output: LsblkOutput =
        serde_json::from_str(raw).map_err(|e| SysError::parse("lsblk", e.to_string()))?;

    let mut devices = Vec::new();
    for device in output.blockdevices {
        flatten_json_device(device, None, &mut devices);
    }
    Ok(devices)
}

fn flatten_json_device(
    device: LsblkDevice,
    parent: Option<&str>,
    out: &mut Vec<DeviceDescriptor>,
) {
    let identifier = device
        .path
        .clone()
        .unwrap_or_else(|| format!("/dev/{}", device.name));
    let kind = DeviceKind::from_lsblk_type(device.kind.as_deref().unwrap_or_default());

    let mut descriptor = DeviceDescriptor::new(identifier.clone(), kind);
    descriptor.size = device.size.as_ref().and_then(json_size).unwrap_or(0);
    descriptor.label = describe(
        device.model.as_deref(),
        device.vendor.as_deref(),
        device.label.as_deref(),
    );
    descriptor.filesystem = non_empty(device.fstype);
    descriptor.mount_point = non_empty(device.mountpoint);
    descriptor.is_mounted = descriptor.mount_point.is_some();
    descriptor.parent = parent.map(str::to_string);
    if kind != DeviceKind::Partition {
        descriptor.partition_table = device.pttype.as_deref().and_then(PartitionTableType::parse);
    }
    descriptor.children = device
        .children
        .iter()
        .map(|child| {
            child
                .path
                .clone()
                .unwrap_or_else(|| format!("/dev/{}", child.name))
        })
        .collect();

    out.push(descriptor);
    for child in device.children {
        flatten_json_device(child, Some(&identifier), out);
    }
}

fn json_size(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(number) => number.as_u64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Parse `lsblk -P` (`KEY="value"` per column, one device per line).
pub fn parse_lsblk_pairs(raw: &str) -> Vec<DeviceDescriptor> {
    let mut devices: Vec<DeviceDescriptor> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let pairs = split_pairs(line);
            let get = |key: &str| {
                pairs
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .filter(|v| !v.is_empty())
            };

            let name = get("NAME")?;
            let kind = DeviceKind::from_lsblk_type(&get("TYPE").unwrap_or_default());
            let mut descriptor = DeviceDescriptor::new(format!("/dev/{name}"), kind);
            descriptor.size = get("SIZE").and_then(|s| s.parse().ok()).unwrap_or(0);
            descriptor.label = describe(get("MODEL").as_deref(), None, get("LABEL").as_deref());
            descriptor.filesystem = get("FSTYPE");
            descriptor.mount_point = get("MOUNTPOINT");
            descriptor.is_mounted = descriptor.mount_point.is_some();
            descriptor.parent = get("PKNAME").map(|parent| format!("/dev/{parent}"));
            if kind != DeviceKind::Partition {
                descriptor.partition_table =
                    get("PTTYPE").as_deref().and_then(PartitionTableType::parse);
            }
            Some(descriptor)
        })
        .collect();

    let links: Vec<(String, String)> = devices
        .iter()
        .filter_map(|d| d.parent.clone().map(|p| (p, d.identifier.clone())))
        .collect();
    for (parent, child) in links {
        if let Some(device) = devices.iter_mut().find(|d| d.identifier == parent) {
            device.children.push(child);
        }
    }

    devices
}

fn split_pairs(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = line.trim();

    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq].trim().to_string();
        let value_start = &rest[eq + 2..];
        let Some(end) = value_start.find('"') else {
            break;
        };
        pairs.push((key, decode_hex_escapes(&value_start[..end])));
        rest = &value_start[end + 1..];
    }

    pairs
}

/// lsblk writes unsafe characters as `\xHH`.
fn decode_hex_escapes(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut index = 0;

    while index < raw.len() {
        if raw[index] == b'\\'
            && index + 3 < raw.len()
            && raw[index + 1] == b'x'
            && raw[index + 2..index + 4].iter().all(u8::is_ascii_hexdigit)
            && let Ok(byte) = u8::from_str_radix(&value[index + 2..index + 4], 16)
        {
            bytes.push(byte);
            index += 4;
            continue;
        }
        bytes.push(raw[index]);
        index += 1;
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse `/proc/self/mounts`.
pub fn parse_proc_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: unescape_mount_field(target),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// The kernel escapes spaces, tabs and backslashes in mount fields as `\NNN`.
fn unescape_mount_field(value: &str) -> String {
    let mut output = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

fn describe(model: Option<&str>, vendor: Option<&str>, label: Option<&str>) -> String {
    let hardware = [vendor, model]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    match label.map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) if hardware.is_empty() => label.to_string(),
        Some(label) => format!("{hardware} ({label})"),
        None => hardware,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
