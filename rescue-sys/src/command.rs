// SPDX-License-Identifier: GPL-3.0-only

//! Helper-tool execution
//!
//! Every external command runs without a shell, with `LC_ALL=C` so its
//! output parses the same way regardless of the operator's locale.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use rescue_contracts::{RescueError, ToolCommand, ToolOutput, ToolRunner};
use rescue_types::PrivilegeEscalation;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::SysError;

/// Runs helper tools on the host, escalating the ones marked privileged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner {
    escalation: PrivilegeEscalation,
}

impl SystemToolRunner {
    pub fn new(escalation: PrivilegeEscalation) -> Self {
        Self { escalation }
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, RescueError> {
        let escalation = if command.privileged {
            self.escalation
        } else {
            PrivilegeEscalation::None
        };
        let (program, args) = resolve_invocation(escalation, &command.program, &command.args);
        debug!(command = %render(&program, &args), "running helper tool");

        let output = Command::new(&program)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SysError::ToolMissing(program.clone()),
                ErrorKind::PermissionDenied => SysError::PermissionDenied(program.clone()),
                _ => SysError::Io(e),
            })?;

        let result = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(status = ?result.status, "{} finished", command.program);
        Ok(result)
    }
}

/// Prefix a command with the escalation helper, unless we already run as root.
pub fn resolve_invocation(
    escalation: PrivilegeEscalation,
    program: &str,
    args: &[String],
) -> (String, Vec<String>) {
    match escalation.prefix() {
        Some((helper, helper_args)) if !running_as_root() => {
            let mut full = Vec::with_capacity(helper_args.len() + args.len() + 1);
            full.extend(helper_args.iter().map(|arg| arg.to_string()));
            full.push(program.to_string());
            full.extend(args.iter().cloned());
            (helper.to_string(), full)
        }
        _ => (program.to_string(), args.to_vec()),
    }
}

pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// True when `program` resolves on `PATH` (or is an existing absolute path).
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        return program.to_string();
    }
    format!("{} {}", program, args.join(" "))
}
