// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use async_trait::async_trait;

use crate::RescueError;

/// A short-lived helper command (lsblk, parted, hdiutil, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Run through the configured privilege escalation helper
    pub privileged: bool,
}

impl ToolCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            privileged: false,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// Exit code; `None` when the tool was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an error
    /// at this level; callers decide what a failed check means.
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, RescueError>;

    /// Run and require a zero exit status.
    async fn run_checked(&self, command: &ToolCommand) -> Result<String, RescueError> {
        let output = self.run(command).await?;
        if output.success() {
            return Ok(output.stdout);
        }
        Err(RescueError::Process {
            exit_code: output.status.unwrap_or(-1),
            message: format!("{command}: {}", output.stderr.trim()),
        })
    }
}
