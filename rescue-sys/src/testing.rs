// SPDX-License-Identifier: GPL-3.0-only

//! Scripted helper-tool runner for unit tests

use std::sync::Mutex;

use async_trait::async_trait;
use rescue_contracts::{RescueError, ToolCommand, ToolOutput, ToolRunner};

/// Replays canned outputs keyed by program name, in order, and records every
/// command it was asked to run.
pub(crate) struct ScriptedRunner {
    responses: Mutex<Vec<(String, ToolOutput)>>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new(responses: Vec<(&str, ToolOutput)>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|(program, output)| (program.to_string(), output))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock calls").clone()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, RescueError> {
        self.calls
            .lock()
            .expect("lock calls")
            .push(command.to_string());

        let mut responses = self.responses.lock().expect("lock responses");
        let index = responses
            .iter()
            .position(|(program, _)| *program == command.program)
            .ok_or_else(|| RescueError::Launch(format!("{} not scripted", command.program)))?;
        Ok(responses.remove(index).1)
    }
}

pub(crate) fn ok(stdout: &str) -> ToolOutput {
    ToolOutput {
        status: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub(crate) fn failed(stderr: &str) -> ToolOutput {
    ToolOutput {
        status: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
