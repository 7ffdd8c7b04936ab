//! Subprocess launch and output capture.

use std::io;
use std::path::Path;
use std::process::{Output, Stdio};

use thiserror::Error;
use tokio::process::Command;

use crate::shell::DetectedShell;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command line is empty")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to collect output of {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// True when the child never started (missing binary, permissions).
    #[must_use]
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::EmptyCommand)
    }
}

/// Console text of a finished child plus how it exited.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedOutput {
    /// stdout followed by anything the child wrote to stderr.
    pub text: String,
    pub success: bool,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CapturedOutput {
    fn from_output(output: &Output) -> Self {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Self {
            text,
            success: output.status.success(),
            exit_code: output.status.code(),
        }
    }

    /// Short human description of the exit status.
    #[must_use]
    pub fn status_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "termination by signal".to_string(),
        }
    }
}

/// Run `line` through `shell` with stderr folded into stdout.
///
/// Resolves once the child exits. There is no timeout: a hung compiler keeps
/// the returned future pending.
pub async fn run_shell_command(
    shell: &DetectedShell,
    line: &str,
    working_dir: Option<&Path>,
) -> Result<CapturedOutput, ProcessError> {
    if line.trim().is_empty() {
        return Err(ProcessError::EmptyCommand);
    }

    let mut cmd = Command::new(&shell.binary);
    cmd.args(&shell.args)
        .arg(format!("{line} 2>&1"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    tracing::debug!(shell = %shell, command = line, "Running shell command");
    collect(cmd, &shell.binary.display().to_string()).await
}

/// Launch an already-built executable directly (no shell) and capture its output.
pub async fn run_executable(
    program: &Path,
    args: &[String],
    working_dir: Option<&Path>,
) -> Result<CapturedOutput, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    tracing::debug!(program = %program.display(), "Running executable");
    collect(cmd, &program.display().to_string()).await
}

async fn collect(mut cmd: Command, program: &str) -> Result<CapturedOutput, ProcessError> {
    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let output = child
        .wait_with_output()
        .await
        .map_err(|source| ProcessError::Io {
            program: program.to_string(),
            source,
        })?;
    Ok(CapturedOutput::from_output(&output))
}
