// SPDX-License-Identifier: GPL-3.0-only

//! Recovery session lifecycle models

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MountRecord, ProgressSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Recovery session state machine
///
/// ```text
/// Idle ──start──▶ Starting ──launched──▶ Running ──completion──▶ Finished
///                     │                    │  │
///                     │               pause│  │abort
///                     ▼                    ▼  ▼
///                   Failed ◀─unexpected─ Pausing / Aborting ──exit──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Pausing,
    Aborting,
    Finished,
    Failed,
}

impl SessionState {
    /// A process is (or is about to be) attached to the session.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Pausing | Self::Aborting
        )
    }

    /// States from which a new session may be started.
    pub fn accepts_start(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Aborting => "aborting",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// ddrescue printed its completion line and exited cleanly.
    Finished,
    /// Stopped on request; the map file allows resuming.
    Paused,
    /// Stopped on request and discarded.
    Aborted,
    /// Launch failure or the process exited without completing.
    Failed,
}

/// Summary attached to every ended session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub bytes_rescued: u64,
    pub total_size: Option<u64>,
    pub error_count: u64,
    pub exit_code: Option<i32>,
    /// Every byte of the input was read without error
    pub all_recovered: bool,
    /// Read-only mount created automatically after a finished session
    pub inspection_mount: Option<MountRecord>,
    /// Why the automatic mount was skipped or failed, if it was attempted
    pub mount_note: Option<String>,
}

impl SessionReport {
    pub fn from_snapshot(
        session_id: SessionId,
        output_path: PathBuf,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        snapshot: Option<&ProgressSnapshot>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            session_id,
            output_path,
            started_at,
            ended_at: Utc::now(),
            elapsed,
            bytes_rescued: snapshot.map(|s| s.bytes_rescued).unwrap_or(0),
            total_size: snapshot.and_then(|s| s.total_size),
            error_count: snapshot.and_then(|s| s.error_count).unwrap_or(0),
            exit_code,
            all_recovered: snapshot.is_some_and(ProgressSnapshot::fully_rescued),
            inspection_mount: None,
            mount_note: None,
        }
    }
}
