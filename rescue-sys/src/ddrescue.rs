// SPDX-License-Identifier: GPL-3.0-only

//! GNU ddrescue command line and version handling

use std::fmt;
use std::path::Path;

use rescue_contracts::{LaunchSpec, RescueError, ToolCommand, ToolRunner};
use rescue_types::{OutputLayout, PrivilegeEscalation, RescueOptions};
use tracing::{info, warn};

use crate::error::SysError;

const MIN_SUPPORTED_MINOR: u32 = 14;
const MAX_SUPPORTED_MINOR: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

/// How to invoke ddrescue on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub program: String,
    pub escalation: PrivilegeEscalation,
    pub host: HostPlatform,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: "ddrescue".to_string(),
            escalation: PrivilegeEscalation::None,
            host: HostPlatform::current(),
        }
    }
}

impl ToolSettings {
    pub fn launch_spec(&self, options: &RescueOptions) -> LaunchSpec {
        LaunchSpec {
            program: self.program.clone(),
            args: build_arguments(options, self.host),
            escalation: self.escalation,
        }
    }
}

/// A ddrescue release, reduced to the parts that decide its output layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub prerelease: bool,
}

impl ToolVersion {
    /// Parse the first line of `ddrescue --version` ("GNU ddrescue 1.23").
    ///
    /// `-rc`/`-pre` suffixes mark a prerelease; anything after major.minor is
    /// ignored.
    pub fn parse(output: &str) -> crate::Result<Self> {
        let first_line = output.lines().next().unwrap_or_default();
        let token = first_line
            .split_whitespace()
            .last()
            .ok_or_else(|| SysError::parse("ddrescue", "empty --version output"))?;

        let (number, prerelease) = match token.find("-rc").or_else(|| token.find("-pre")) {
            Some(pos) => (&token[..pos], true),
            None => (token, false),
        };

        let mut parts = number.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| SysError::parse("ddrescue", format!("bad version {token:?}")))?;
        let minor = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| SysError::parse("ddrescue", format!("bad version {token:?}")))?;

        Ok(Self {
            major,
            minor,
            prerelease,
        })
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1 && (MIN_SUPPORTED_MINOR..=MAX_SUPPORTED_MINOR).contains(&self.minor)
    }

    /// Nearest supported release.
    pub fn clamped(&self) -> Self {
        let minor = match self.major {
            0 => MIN_SUPPORTED_MINOR,
            1 => self.minor.clamp(MIN_SUPPORTED_MINOR, MAX_SUPPORTED_MINOR),
            _ => MAX_SUPPORTED_MINOR,
        };
        Self {
            major: 1,
            minor,
            prerelease: self.prerelease,
        }
    }

    pub fn layout(&self) -> OutputLayout {
        match self.clamped().minor {
            22.. => OutputLayout::V122,
            21 => OutputLayout::V121,
            _ => OutputLayout::Legacy,
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.prerelease {
            f.write_str(" (prerelease)")?;
        }
        Ok(())
    }
}

/// Ask the installed ddrescue for its version.
pub async fn detect_version(
    runner: &dyn ToolRunner,
    program: &str,
) -> Result<ToolVersion, RescueError> {
    let stdout = runner
        .run_checked(&ToolCommand::new(program, ["--version"]))
        .await?;
    let version = ToolVersion::parse(&stdout)?;

    if version.is_supported() {
        info!("Detected ddrescue {version}");
    } else {
        warn!(
            "ddrescue {version} is outside the supported 1.{MIN_SUPPORTED_MINOR}-1.{MAX_SUPPORTED_MINOR} range, treating it as {}",
            version.clamped()
        );
    }
    Ok(version)
}

/// Map options onto ddrescue flags, one flag per option.
pub fn build_arguments(options: &RescueOptions, host: HostPlatform) -> Vec<String> {
    let mut args = vec!["-v".to_string()];
    let input_is_device = options.input.starts_with("/dev");

    // ddrescue refuses -d on regular files under macOS.
    if options.direct_disk_access && (host == HostPlatform::Linux || input_is_device) {
        args.push("-d".to_string());
    }
    if options.force_overwrite {
        args.push("-f".to_string());
    }
    if options.reverse {
        args.push("-R".to_string());
    }
    if options.preallocate {
        args.push("-p".to_string());
    }
    if options.no_split {
        args.push("-n".to_string());
    }
    if options.retry_bad_sectors {
        args.push("-r".to_string());
        args.push(
            options
                .max_retries
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-1".to_string()),
        );
    }
    push_numeric(&mut args, "-e", options.max_errors);
    push_numeric(&mut args, "-E", options.max_error_rate);
    push_numeric(&mut args, "-c", options.cluster_size.map(u64::from));
    push_numeric(&mut args, "-b", options.input_block_size.map(u64::from));
    push_numeric(&mut args, "-s", options.input_size);

    let input = if host == HostPlatform::MacOs && options.direct_disk_access {
        raw_device_path(&options.input)
    } else {
        options.input.display().to_string()
    };
    args.push(input);
    args.push(options.output.display().to_string());
    if let Some(map_file) = &options.map_file {
        args.push(map_file.display().to_string());
    }

    args
}

fn push_numeric(args: &mut Vec<String>, flag: &str, value: Option<u64>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// `/dev/diskN` → `/dev/rdiskN`, the unbuffered character device on macOS.
fn raw_device_path(path: &Path) -> String {
    let display = path.display().to_string();
    match display.strip_prefix("/dev/disk") {
        Some(rest) => format!("/dev/rdisk{rest}"),
        None => display,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing_strips_prerelease_suffix() {
        let version = ToolVersion::parse("GNU ddrescue 1.24-rc1\nCopyright (C) 2019").unwrap();
        assert_eq!(version.minor, 24);
        assert!(version.prerelease);
        assert_eq!(version.layout(), OutputLayout::V122);

        let version = ToolVersion::parse("GNU ddrescue 1.21\n").unwrap();
        assert_eq!(version.layout(), OutputLayout::V121);
        assert!(!version.prerelease);
    }

    #[test]
    fn versions_outside_range_clamp_to_nearest_layout() {
        let old = ToolVersion::parse("GNU ddrescue 1.12").unwrap();
        assert!(!old.is_supported());
        assert_eq!(old.clamped().minor, 14);
        assert_eq!(old.layout(), OutputLayout::Legacy);

        let new = ToolVersion::parse("GNU ddrescue 1.30").unwrap();
        assert_eq!(new.clamped().minor, 28);
        assert_eq!(new.layout(), OutputLayout::V122);
    }

    #[test]
    fn garbage_version_is_a_parse_error() {
        assert!(ToolVersion::parse("").is_err());
        assert!(ToolVersion::parse("ddrescue unknown").is_err());
    }

    #[test]
    fn options_map_one_to_one_onto_flags() {
        let mut options = RescueOptions::new("/dev/sdb", "/srv/disk.img").with_map_file("/srv/disk.map");
        options.direct_disk_access = true;
        options.reverse = true;
        options.no_split = true;
        options.retry_bad_sectors = true;
        options.max_retries = Some(3);
        options.cluster_size = Some(128);

        let args = build_arguments(&options, HostPlatform::Linux);
        assert_eq!(
            args,
            vec![
                "-v", "-d", "-R", "-n", "-r", "3", "-c", "128", "/dev/sdb", "/srv/disk.img",
                "/srv/disk.map",
            ]
        );
    }

    #[test]
    fn macos_direct_access_uses_raw_device() {
        let mut options = RescueOptions::new("/dev/disk3", "/Users/me/disk.img");
        options.direct_disk_access = true;
        options.retry_bad_sectors = true;

        let args = build_arguments(&options, HostPlatform::MacOs);
        assert_eq!(args, vec!["-v", "-d", "-r", "-1", "/dev/rdisk3", "/Users/me/disk.img"]);

        let mut from_file = RescueOptions::new("/Users/me/old.img", "/Users/me/new.img");
        from_file.direct_disk_access = true;
        let args = build_arguments(&from_file, HostPlatform::MacOs);
        assert!(!args.contains(&"-d".to_string()));
    }
}
