//! Build orchestration.
//!
//! [`BuildOrchestrator::build`] turns the project's sources, include
//! directories and flags into one compiler command line and runs it on a
//! background task. At most one build is in flight: the `building` flag is
//! claimed with an atomic swap, and a request that loses the swap is dropped,
//! not queued. Results land in two output slots (build and console) that any
//! thread may read.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use kiln_core::{FileGateway, Project, TabRegistry};
use kiln_tools::{
    CapturedOutput, DetectedShell, ProcessError, quote_arg, run_executable, run_shell_command,
};
use kiln_types::{CompileMode, Compiler, CompilerFlag};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Stored when the compiler exits successfully without printing anything.
pub const BUILD_SUCCEEDED_NO_OUTPUT: &str = "Build succeeded (no compiler output).";

/// Prefix of the stored output when the compiler could not be launched.
pub const COMPILER_SPAWN_FAILED: &str = "Failed to start compiler process";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub compiler: Compiler,
    pub flags: Vec<CompilerFlag>,
    pub mode: CompileMode,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            compiler: Compiler::Gcc,
            flags: vec![CompilerFlag::Cpp20],
            mode: CompileMode::CompileAndLink,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("project has no run target")]
    NoTarget,
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Starts compiler and program processes.
///
/// The production implementation goes through the shell; tests substitute a
/// launcher that records or gates invocations.
pub trait Launcher: Send + Sync + 'static {
    /// Run a full compiler command line with `working_dir` as the current
    /// directory, capturing stdout and stderr together.
    fn compile(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> impl Future<Output = Result<CapturedOutput, ProcessError>> + Send;

    /// Run a built program and capture its console output.
    fn execute(
        &self,
        program: &Path,
        working_dir: &Path,
    ) -> impl Future<Output = Result<CapturedOutput, ProcessError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ShellLauncher {
    shell: DetectedShell,
}

impl ShellLauncher {
    #[must_use]
    pub fn new(shell: DetectedShell) -> Self {
        Self { shell }
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }
}

fn non_empty(dir: &Path) -> Option<&Path> {
    (!dir.as_os_str().is_empty()).then_some(dir)
}

impl Launcher for ShellLauncher {
    async fn compile(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CapturedOutput, ProcessError> {
        run_shell_command(&self.shell, command, non_empty(working_dir)).await
    }

    async fn execute(
        &self,
        program: &Path,
        working_dir: &Path,
    ) -> Result<CapturedOutput, ProcessError> {
        run_executable(program, &[], non_empty(working_dir)).await
    }
}

/// Outcome of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Compiler output, or a canonical message when the compiler printed nothing.
    pub output: String,
    pub success: bool,
}

impl BuildReport {
    fn from_output(captured: CapturedOutput) -> Self {
        let output = if !captured.text.trim().is_empty() {
            captured.text
        } else if captured.success {
            BUILD_SUCCEEDED_NO_OUTPUT.to_string()
        } else {
            format!(
                "Build failed with {} (no compiler output).",
                captured.status_label()
            )
        };
        Self {
            output,
            success: captured.success,
        }
    }

    fn from_error(err: &ProcessError) -> Self {
        let output = if err.is_spawn_failure() {
            format!("{COMPILER_SPAWN_FAILED}: {err}\n")
        } else {
            format!("Compiler process failed: {err}\n")
        };
        Self {
            output,
            success: false,
        }
    }
}

/// Handle on a build that was accepted. Dropping it does not cancel the build.
#[derive(Debug)]
pub struct BuildTicket {
    done: oneshot::Receiver<BuildReport>,
}

impl BuildTicket {
    /// Wait for the compiler to finish. `None` if the build task was torn
    /// down before reporting (runtime shutdown).
    pub async fn wait(self) -> Option<BuildReport> {
        self.done.await.ok()
    }
}

#[derive(Debug)]
pub enum BuildSubmission {
    Started(BuildTicket),
    /// Another build holds the flag; this request had no effect.
    AlreadyRunning,
    /// No project is open.
    NoProject,
}

impl BuildSubmission {
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    #[must_use]
    pub fn into_ticket(self) -> Option<BuildTicket> {
        match self {
            Self::Started(ticket) => Some(ticket),
            Self::AlreadyRunning | Self::NoProject => None,
        }
    }
}

#[derive(Debug, Default)]
struct BuildState {
    building: AtomicBool,
    build_output: Mutex<Option<String>>,
    console_output: Mutex<Option<String>>,
}

impl BuildState {
    fn set_build_output(&self, text: String) {
        *self
            .build_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(text);
    }

    fn set_console_output(&self, text: String) {
        *self
            .console_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(text);
    }
}

/// Clears the building flag when the background task ends, including by panic.
struct InFlight(Arc<BuildState>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.building.store(false, Ordering::Release);
    }
}

pub struct BuildOrchestrator<L: Launcher = ShellLauncher> {
    settings: BuildSettings,
    launcher: Arc<L>,
    state: Arc<BuildState>,
    runtime: Handle,
}

impl BuildOrchestrator<ShellLauncher> {
    /// Compile through `shell`, spawning build tasks on `runtime`.
    #[must_use]
    pub fn new(settings: BuildSettings, shell: DetectedShell, runtime: Handle) -> Self {
        Self::with_launcher(settings, ShellLauncher::new(shell), runtime)
    }
}

impl<L: Launcher> BuildOrchestrator<L> {
    pub fn with_launcher(settings: BuildSettings, launcher: L, runtime: Handle) -> Self {
        Self {
            settings,
            launcher: Arc::new(launcher),
            state: Arc::new(BuildState::default()),
            runtime,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn set_compiler(&mut self, compiler: Compiler) {
        self.settings.compiler = compiler;
    }

    pub fn set_flags(&mut self, flags: Vec<CompilerFlag>) {
        self.settings.flags = flags;
    }

    pub fn set_mode(&mut self, mode: CompileMode) {
        self.settings.mode = mode;
    }

    #[must_use]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    #[must_use]
    pub fn is_building(&self) -> bool {
        self.state.building.load(Ordering::Acquire)
    }

    /// Output of the most recent finished build. `None` until one finishes.
    #[must_use]
    pub fn last_build_output(&self) -> Option<String> {
        self.state
            .build_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Output of the most recent [`run`](Self::run).
    #[must_use]
    pub fn last_console_output(&self) -> Option<String> {
        self.state
            .console_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Compile `project` in the background.
    ///
    /// Returns without waiting for the compiler. Edited tabs and a dirty
    /// project file are saved first so the compiler sees current sources.
    /// Save failures are logged and the build proceeds.
    pub fn build(
        &self,
        project: &mut Project,
        tabs: &mut TabRegistry,
        gateway: &dyn FileGateway,
    ) -> BuildSubmission {
        if !project.is_open() {
            tracing::warn!("Build requested with no project open");
            return BuildSubmission::NoProject;
        }

        if self.state.building.swap(true, Ordering::AcqRel) {
            tracing::debug!(project = project.name(), "Build already in progress");
            return BuildSubmission::AlreadyRunning;
        }
        let in_flight = InFlight(Arc::clone(&self.state));

        if project.is_dirty() || tabs.has_unsaved_changes() {
            let report = tabs.save_all(gateway);
            if !report.all_saved() {
                tracing::warn!(
                    skipped = report.skipped.len(),
                    "Building with unsaved tabs"
                );
            }
        }
        if project.is_dirty()
            && let Err(e) = project.save()
        {
            tracing::warn!(project = project.name(), "Couldn't save project: {e}");
        }

        let command = build_command(&self.settings, project);
        let working_dir = project.root_directory().to_path_buf();
        tracing::info!(command = %command, "Starting build");

        let (done_tx, done_rx) = oneshot::channel();
        let launcher = Arc::clone(&self.launcher);
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            let report = match launcher.compile(&command, &working_dir).await {
                Ok(captured) => BuildReport::from_output(captured),
                Err(e) => {
                    tracing::warn!("Compiler did not run: {e}");
                    BuildReport::from_error(&e)
                }
            };
            tracing::info!(success = report.success, "Build finished");
            state.set_build_output(report.output.clone());
            drop(in_flight);
            let _ = done_tx.send(report);
        });

        BuildSubmission::Started(BuildTicket { done: done_rx })
    }

    /// Launch the built program and wait for it to exit.
    ///
    /// The program is `<root>/<name>` plus the platform executable suffix.
    /// Its output, or the launch error, is stored as the console output.
    pub async fn run(&self, project: &Project) -> Result<CapturedOutput, RunError> {
        if project.name().is_empty() {
            tracing::warn!("Run requested but the project has no target name");
            return Err(RunError::NoTarget);
        }

        let program = project.executable_path();
        tracing::info!(program = %program.display(), "Running program");

        match self
            .launcher
            .execute(&program, project.root_directory())
            .await
        {
            Ok(captured) => {
                self.state.set_console_output(captured.text.clone());
                Ok(captured)
            }
            Err(e) => {
                tracing::warn!(program = %program.display(), "Couldn't run program: {e}");
                self.state.set_console_output(format!("{e}\n"));
                Err(e.into())
            }
        }
    }
}

/// Space-separated command-line tokens for `flags`, in order.
#[must_use]
pub fn flags_to_string(flags: &[CompilerFlag]) -> String {
    flags
        .iter()
        .map(|flag| flag.as_flag())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Each path double-quoted, space-separated.
#[must_use]
pub fn sources_to_string(sources: &[PathBuf]) -> String {
    sources
        .iter()
        .map(|path| quote_arg(path))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `<compiler> [-c] <flags> -I"<dir>"... <project flags> "<src>"... -o "<output>"`
#[must_use]
pub fn build_command(settings: &BuildSettings, project: &Project) -> String {
    let mut parts: Vec<String> = vec![settings.compiler.executable().to_string()];
    if let Some(mode) = settings.mode.as_flag() {
        parts.push(mode.to_string());
    }
    if !settings.flags.is_empty() {
        parts.push(flags_to_string(&settings.flags));
    }
    parts.extend(
        project
            .include_dirs()
            .iter()
            .map(|dir| format!("-I{}", quote_arg(dir))),
    );
    parts.extend(
        project
            .compiler_flags()
            .iter()
            .filter(|flag| !flag.trim().is_empty())
            .cloned(),
    );
    if !project.source_files().is_empty() {
        parts.push(sources_to_string(project.source_files()));
    }
    parts.push("-o".to_string());
    parts.push(quote_arg(&project.executable_path()));
    parts.join(" ")
}
