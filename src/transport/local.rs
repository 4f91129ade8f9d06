//! JT-012: Local process execution.

use super::{CommandRunner, CommandSpec, ExecOutput};
use crate::core::error::{Error, Result};
use std::process::{Command, Stdio};

/// Spawns commands directly (no shell) on this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args).envs(&spec.env);
        if let Some(dir) = &spec.dir {
            cmd.current_dir(dir);
        }
        let spawn_err = |e: std::io::Error| Error::Command {
            command: spec.command.clone(),
            message: e.to_string(),
        };

        tracing::debug!(command = %spec.display_line(), interactive = spec.interactive, "spawning");
        if spec.interactive {
            let status = cmd
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(spawn_err)?;
            return Ok(ExecOutput {
                exit_code: status.code().unwrap_or(-1),
                ..ExecOutput::default()
            });
        }

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(spawn_err)?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_jt012_local_echo() {
        let out = LocalRunner.run(&CommandSpec::new("echo").arg("hello")).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_jt012_local_failure() {
        let out = LocalRunner.run(&sh("exit 42")).unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 42);
    }

    #[test]
    fn test_jt012_local_stderr() {
        let out = LocalRunner.run(&sh("echo err >&2")).unwrap();
        assert!(out.success());
        assert!(out.stderr.contains("err"));
    }

    #[test]
    fn test_jt012_env_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sh("echo $JT012_VALUE; pwd");
        spec.env.insert("JT012_VALUE".into(), "set".into());
        spec.dir = Some(dir.path().to_path_buf());
        let out = LocalRunner.run(&spec).unwrap();
        let lines: Vec<_> = out.stdout.lines().collect();
        assert_eq!(lines[0], "set");
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(lines[1]).canonicalize().unwrap(), expected);
    }

    #[test]
    fn test_jt012_signal_killed() {
        // No exit code when killed by a signal
        let out = LocalRunner.run(&sh("kill -9 $$")).unwrap();
        assert_eq!(out.exit_code, -1);
    }

    #[test]
    fn test_jt012_spawn_failure() {
        let err = LocalRunner
            .run(&CommandSpec::new("/definitely/not/a/command"))
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }), "{err}");
    }
}
