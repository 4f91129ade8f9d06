//! JT-011: Command transport: local execution and record-only mode.

pub mod local;
pub mod record;

use crate::core::error::Result;
use indexmap::IndexMap;
use std::path::PathBuf;

/// A fully evaluated external command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub dir: Option<PathBuf>,
    /// Inherit the terminal instead of capturing output
    pub interactive: bool,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `command arg1 arg2` for diagnostics.
    pub fn display_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from executing a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands on behalf of the engine.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jt011_exec_output_success() {
        let ok = ExecOutput {
            exit_code: 0,
            stdout: "ok".into(),
            stderr: "".into(),
        };
        assert!(ok.success());
        let sig = ExecOutput {
            exit_code: 137,
            stdout: "".into(),
            stderr: "killed".into(),
        };
        assert!(!sig.success());
    }

    #[test]
    fn test_jt011_display_line() {
        let spec = CommandSpec::new("cargo").arg("build").arg("--release");
        assert_eq!(spec.display_line(), "cargo build --release");
        assert_eq!(CommandSpec::new("ls").display_line(), "ls");
    }
}
