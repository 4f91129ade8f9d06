//! JT-013: Record-only command runner for test mode.
//!
//! Nothing is executed. Each call is recorded and answered with a scripted
//! output for its command (or a successful empty output).

use super::{CommandRunner, CommandSpec, ExecOutput};
use crate::core::error::Result;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    scripted: HashMap<String, ExecOutput>,
    delays: HashMap<String, Duration>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `command` with `output`.
    pub fn respond(mut self, command: &str, output: ExecOutput) -> Self {
        self.scripted.insert(command.to_string(), output);
        self
    }

    /// Answer `command` with the given stdout and a zero status.
    pub fn stdout(self, command: &str, stdout: &str) -> Self {
        self.respond(
            command,
            ExecOutput {
                stdout: stdout.to_string(),
                ..ExecOutput::default()
            },
        )
    }

    /// Hold every call to `command` for `delay` before answering.
    pub fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    /// Recorded calls in call order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.calls().iter().any(|c| c.command == command)
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());
        tracing::debug!(command = %spec.display_line(), "recorded");
        if let Some(delay) = self.delays.get(&spec.command) {
            std::thread::sleep(*delay);
        }
        Ok(self
            .scripted
            .get(&spec.command)
            .cloned()
            .unwrap_or_default())
    }
}
