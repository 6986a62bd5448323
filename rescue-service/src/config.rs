// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rescue_engine::ControllerConfig;
use rescue_sys::ToolSettings;
use rescue_types::PrivilegeEscalation;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "rescue-supervisor";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// ddrescue binary name or path
    pub tool: String,
    pub escalation: PrivilegeEscalation,
    /// Seconds an interrupted ddrescue gets before SIGKILL
    pub stop_grace_secs: u64,
    pub mount_root: PathBuf,
    pub auto_mount_on_finish: bool,
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool: "ddrescue".to_string(),
            escalation: if cfg!(target_os = "macos") {
                PrivilegeEscalation::SudoAskpass
            } else {
                PrivilegeEscalation::Pkexec
            },
            stop_grace_secs: 5,
            mount_root: PathBuf::from("/tmp").join(APP_DIR).join("mounts"),
            auto_mount_on_finish: false,
            log_level: LoggingLevel::Info,
            log_to_disk: true,
            log_dir: None,
        }
    }
}

impl Config {
    /// Read `path`, or the default location when `None`. A missing file
    /// yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            tool: ToolSettings {
                program: self.tool.clone(),
                escalation: self.escalation,
                ..ToolSettings::default()
            },
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            auto_mount_on_finish: self.auto_mount_on_finish,
            mount_root: self.mount_root.clone(),
            layout_hint: None,
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(dir).join(APP_DIR).join("config.toml"));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = Config::load(Some(&dir.path().join("absent.toml"))).expect("defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "tool = \"/opt/bin/ddrescue\"\nescalation = \"none\"\nstop_grace_secs = 10\nlog_level = \"debug\"\n",
        )
        .expect("write config");

        let config = Config::load(Some(&path)).expect("parse");
        assert_eq!(config.tool, "/opt/bin/ddrescue");
        assert_eq!(config.escalation, PrivilegeEscalation::None);
        assert_eq!(config.log_level, LoggingLevel::Debug);
        assert!(config.log_to_disk);

        let controller = config.controller_config();
        assert_eq!(controller.stop_grace, Duration::from_secs(10));
        assert_eq!(controller.tool.program, "/opt/bin/ddrescue");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "stop_grace_secs = \"soon\"\n").expect("write config");
        assert!(Config::load(Some(&path)).is_err());
    }
}
