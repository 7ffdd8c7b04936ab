//! Debugger session model.
//!
//! Holds the target executable and an ordered breakpoint list, and turns them
//! into a `gdb` invocation.

use std::env::consts::EXE_SUFFIX;
use std::fmt;
use std::path::{Path, PathBuf};

use kiln_tools::{CapturedOutput, DetectedShell, ProcessError, quote_arg, run_shell_command};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("executable path is empty")]
    EmptyPath,
    #[error("executable {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("no executable loaded")]
    NoExecutable,
    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakpointKind {
    #[default]
    Line,
    Function,
    Conditional,
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakpointStatus {
    #[default]
    Enabled,
    Disabled,
    Hit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub file: String,
    pub line: u32,
    pub kind: BreakpointKind,
    pub status: BreakpointStatus,
    /// Only set for [`BreakpointKind::Conditional`].
    pub condition: Option<String>,
}

impl Breakpoint {
    fn at(&self, file: &str, line: u32) -> bool {
        self.file == file && self.line == line
    }

    /// Argument for gdb's `break` command.
    fn gdb_location(&self) -> String {
        match &self.condition {
            Some(cond) => format!("{}:{} if {}", self.file, self.line, cond),
            None => format!("{}:{}", self.file, self.line),
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Default)]
pub struct DebugSession {
    executable: Option<PathBuf>,
    breakpoints: Vec<Breakpoint>,
}

impl DebugSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Select the program to debug. The platform executable suffix is
    /// appended when `path` lacks it.
    pub fn load_executable(&mut self, path: impl AsRef<Path>) -> Result<(), DebugError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            tracing::warn!("Debug executable path is empty");
            return Err(DebugError::EmptyPath);
        }

        let path = with_exe_suffix(path);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Debug executable does not exist");
            return Err(DebugError::NotFound(path));
        }

        tracing::debug!(path = %path.display(), "Debug executable loaded");
        self.executable = Some(path);
        Ok(())
    }

    /// Add an enabled line breakpoint. Returns false if one already exists there.
    pub fn add_breakpoint(&mut self, file: impl Into<String>, line: u32) -> bool {
        self.insert(Breakpoint {
            file: file.into(),
            line,
            kind: BreakpointKind::Line,
            status: BreakpointStatus::Enabled,
            condition: None,
        })
    }

    pub fn add_conditional_breakpoint(
        &mut self,
        file: impl Into<String>,
        line: u32,
        condition: impl Into<String>,
    ) -> bool {
        self.insert(Breakpoint {
            file: file.into(),
            line,
            kind: BreakpointKind::Conditional,
            status: BreakpointStatus::Enabled,
            condition: Some(condition.into()),
        })
    }

    fn insert(&mut self, bp: Breakpoint) -> bool {
        if self.find_breakpoint(&bp.file, bp.line).is_some() {
            return false;
        }
        tracing::trace!(breakpoint = %bp, "Breakpoint added");
        self.breakpoints.push(bp);
        true
    }

    pub fn remove_breakpoint(&mut self, file: &str, line: u32) -> bool {
        match self.breakpoints.iter().position(|bp| bp.at(file, line)) {
            Some(index) => {
                self.breakpoints.remove(index);
                tracing::trace!(file, line, "Breakpoint removed");
                true
            }
            None => {
                tracing::warn!(file, line, "No breakpoint to remove");
                false
            }
        }
    }

    pub fn enable_breakpoint(&mut self, file: &str, line: u32) -> bool {
        self.set_status(file, line, BreakpointStatus::Enabled)
    }

    pub fn disable_breakpoint(&mut self, file: &str, line: u32) -> bool {
        self.set_status(file, line, BreakpointStatus::Disabled)
    }

    fn set_status(&mut self, file: &str, line: u32, status: BreakpointStatus) -> bool {
        match self.find_breakpoint_mut(file, line) {
            Some(bp) => {
                bp.status = status;
                true
            }
            None => {
                tracing::warn!(file, line, "No breakpoint at location");
                false
            }
        }
    }

    #[must_use]
    pub fn find_breakpoint(&self, file: &str, line: u32) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|bp| bp.at(file, line))
    }

    fn find_breakpoint_mut(&mut self, file: &str, line: u32) -> Option<&mut Breakpoint> {
        self.breakpoints.iter_mut().find(|bp| bp.at(file, line))
    }

    /// `gdb --ex "break <loc>"... --ex run --args "<exe>"`, enabled breakpoints only.
    #[must_use]
    pub fn gdb_command(&self) -> Option<String> {
        let exe = self.executable.as_deref()?;
        let mut cmd = String::from("gdb");
        for bp in self
            .breakpoints
            .iter()
            .filter(|bp| bp.status != BreakpointStatus::Disabled)
        {
            cmd.push_str(&format!(
                " --ex \"break {}\"",
                bp.gdb_location().replace('"', "\\\"")
            ));
        }
        cmd.push_str(" --ex run --args ");
        cmd.push_str(&quote_arg(exe));
        Some(cmd)
    }

    /// Run gdb on the loaded executable and wait for it to exit.
    pub async fn launch(&self, shell: &DetectedShell) -> Result<CapturedOutput, DebugError> {
        let command = self.gdb_command().ok_or(DebugError::NoExecutable)?;
        tracing::debug!(command = %command, "Launching debugger");
        let output = run_shell_command(shell, &command, None).await?;
        if !output.success {
            tracing::warn!("Debugger exited with {}", output.status_label());
        }
        Ok(output)
    }
}

fn with_exe_suffix(path: &Path) -> PathBuf {
    let suffix = EXE_SUFFIX.trim_start_matches('.');
    if suffix.is_empty()
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(suffix))
    {
        return path.to_path_buf();
    }
    let mut with_suffix = path.as_os_str().to_owned();
    with_suffix.push(EXE_SUFFIX);
    PathBuf::from(with_suffix)
}
