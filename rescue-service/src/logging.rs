// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LoggingLevel};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_PREFIX: &str = "rescue-supervisor.log";
const APP_DIR: &str = "rescue-supervisor";
const KEEP_DAYS: u64 = 7;
const OWN_CRATES: [&str; 4] = ["rescue_service", "rescue_engine", "rescue_sys", "rescue_contracts"];

/// Install the global subscriber: human-readable lines on stderr, plus a
/// daily-rolling file when logging to disk is enabled.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub(crate) fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(config.log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Events go to stdout; keep diagnostics out of the way.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    if !config.log_to_disk {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        return;
    }

    match file_writer(config.log_dir.as_deref()) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_timer(tracing_subscriber::fmt::time::SystemTime);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("rescue-service: failed to initialize file logging: {e:#}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

/// Our crates at the configured level, everything else at warn.
fn default_directives(level: LoggingLevel) -> String {
    let mut directives: Vec<String> = OWN_CRATES
        .iter()
        .map(|name| format!("{name}={}", level.as_directive()))
        .collect();
    directives.push("warn".to_string());
    directives.join(",")
}

fn file_writer(
    configured_dir: Option<&Path>,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let (dir, prefix) = resolve_log_location(configured_dir);

    fs::create_dir_all(&dir)
        .with_context(|| format!("create log directory failed: {}", dir.display()))?;

    cleanup_old_logs(&dir, &prefix);

    let appender = tracing_appender::rolling::daily(&dir, &prefix);
    Ok(tracing_appender::non_blocking(appender))
}

fn resolve_log_location(configured_dir: Option<&Path>) -> (PathBuf, OsString) {
    if let Some(file) = std::env::var_os("RESCUE_SUPERVISOR_LOG_FILE") {
        let path = PathBuf::from(file);
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(default_log_dir);
        let prefix = path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from(DEFAULT_LOG_PREFIX));
        return (dir, prefix);
    }

    if let Some(dir) = std::env::var_os("RESCUE_SUPERVISOR_LOG_DIR") {
        return (PathBuf::from(dir), OsString::from(DEFAULT_LOG_PREFIX));
    }

    let dir = configured_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(default_log_dir);
    (dir, OsString::from(DEFAULT_LOG_PREFIX))
}

fn default_log_dir() -> PathBuf {
    if let Some(xdg_state) = std::env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(xdg_state).join(APP_DIR).join("logs");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(APP_DIR)
            .join("logs");
    }

    PathBuf::from("/tmp").join(APP_DIR).join("logs")
}

fn cleanup_old_logs(dir: &Path, prefix: &OsString) {
    let Some(cutoff) =
        SystemTime::now().checked_sub(Duration::from_secs(KEEP_DAYS * 24 * 60 * 60))
    else {
        return;
    };
    let prefix = prefix.to_string_lossy();

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        // Only files written by the rolling appender.
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with(prefix.as_ref())
        {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified < cutoff {
            let _ = fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_scope_our_crates() {
        let directives = default_directives(LoggingLevel::Debug);
        assert!(directives.starts_with("rescue_service=debug,"));
        assert!(directives.contains("rescue_engine=debug"));
        assert!(directives.ends_with(",warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn cleanup_keeps_fresh_and_foreign_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let ours = dir.path().join("rescue-supervisor.log.2026-10-01");
        let foreign = dir.path().join("notes.txt");
        fs::write(&ours, "recent").expect("write log");
        fs::write(&foreign, "keep").expect("write other");

        cleanup_old_logs(dir.path(), &OsString::from(DEFAULT_LOG_PREFIX));

        assert!(ours.exists());
        assert!(foreign.exists());
    }
}
