//! The [`Workbench`] owns one of everything: the tab registry, the open
//! project, the file gateway, the build orchestrator, the language server
//! client and the debug session. It is built once at startup and passed to
//! whoever drives it; nothing here is global.

use std::path::{Path, PathBuf};

use kiln_core::{
    DiskGateway, EditorTab, FileGateway, GatewayError, Project, ProjectError, RandomIdSource,
    SaveReport, TabRegistry,
};
use kiln_lsp::{LspClient, LspError, ServerProcess, StdioProcess};
use kiln_tools::{CapturedOutput, DetectedShell, detect_shell};
use kiln_types::{RequestId, TabId};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::build::{BuildOrchestrator, BuildSubmission, Launcher, RunError, ShellLauncher};
use crate::config::KilnConfig;
use crate::debug::{DebugError, DebugSession};

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("no tab is selected")]
    NoCurrentTab,
    #[error("tab '{0}' has no file on disk")]
    UnsavedTab(String),
    #[error(transparent)]
    Lsp(#[from] LspError),
}

pub struct Workbench<L: Launcher = ShellLauncher, P: ServerProcess = StdioProcess> {
    tabs: TabRegistry,
    project: Project,
    gateway: Box<dyn FileGateway>,
    build: BuildOrchestrator<L>,
    lsp: LspClient<P>,
    debug: DebugSession,
    shell: DetectedShell,
}

impl Workbench {
    /// Production wiring: disk gateway, shell-driven compiler, stdio server.
    #[must_use]
    pub fn from_config(config: &KilnConfig, runtime: Handle) -> Self {
        let shell = detect_shell(config.build.shell.as_ref());
        tracing::debug!(shell = %shell, "Detected build shell");
        Self::from_parts(
            TabRegistry::with_id_source(RandomIdSource::new(config.editor.id_length)),
            Box::new(DiskGateway::new()),
            BuildOrchestrator::new(config.build.settings(), shell.clone(), runtime),
            LspClient::new(config.lsp.clone()),
            shell,
        )
    }
}

impl<L: Launcher, P: ServerProcess> Workbench<L, P> {
    pub fn from_parts(
        tabs: TabRegistry,
        gateway: Box<dyn FileGateway>,
        build: BuildOrchestrator<L>,
        lsp: LspClient<P>,
        shell: DetectedShell,
    ) -> Self {
        Self {
            tabs,
            project: Project::default(),
            gateway,
            build,
            lsp,
            debug: DebugSession::new(),
            shell,
        }
    }

    #[must_use]
    pub fn tabs(&self) -> &TabRegistry {
        &self.tabs
    }

    pub fn tabs_mut(&mut self) -> &mut TabRegistry {
        &mut self.tabs
    }

    #[must_use]
    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    #[must_use]
    pub fn build_orchestrator(&self) -> &BuildOrchestrator<L> {
        &self.build
    }

    pub fn build_orchestrator_mut(&mut self) -> &mut BuildOrchestrator<L> {
        &mut self.build
    }

    #[must_use]
    pub fn lsp(&self) -> &LspClient<P> {
        &self.lsp
    }

    #[must_use]
    pub fn debug_session(&self) -> &DebugSession {
        &self.debug
    }

    pub fn debug_session_mut(&mut self) -> &mut DebugSession {
        &mut self.debug
    }

    // Project lifecycle

    pub fn new_project(&mut self, root: impl Into<PathBuf>, name: impl Into<String>) {
        self.replace_project(Project::create_new(root, name));
    }

    /// Open a project file and adopt its compiler choice for builds.
    pub fn open_project(&mut self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let project = Project::open(path)?;
        match project.compiler() {
            Ok(compiler) => self.build.set_compiler(compiler),
            Err(e) => tracing::warn!("Keeping configured compiler: {e}"),
        }
        self.replace_project(project);
        Ok(())
    }

    pub fn save_project(&mut self) -> Result<(), ProjectError> {
        self.project.save()
    }

    pub fn close_project(&mut self) {
        self.replace_project(Project::default());
    }

    fn replace_project(&mut self, project: Project) {
        if self.project.is_open() && self.project.is_dirty() {
            tracing::warn!(project = self.project.name(), "Discarding unsaved project changes");
        }
        self.project = project;
        for (_, tab) in self.tabs.iter() {
            if let Some(path) = tab.path()
                && self.project.is_open()
            {
                self.project.mark_file_open(path);
            }
        }
    }

    // Tabs

    /// Open `path` in a tab and select it. A file that is already open is
    /// selected instead of being read again.
    pub async fn open_file(&mut self, path: impl AsRef<Path>) -> Result<TabId, GatewayError> {
        let path = path.as_ref();
        if let Some(id) = self.tab_for_path(path) {
            self.tabs.set_current_id(&id);
            return Ok(id);
        }

        let text = self.gateway.read_file(path)?;
        let id = self.tabs.add_tab(EditorTab::from_file(path, text.as_str()));
        self.tabs.set_current_id(&id);
        if self.project.is_open() {
            self.project.mark_file_open(path);
        }

        if self.lsp.is_running()
            && let Err(e) = self.lsp.did_open(path, &text).await
        {
            tracing::warn!(path = %path.display(), "Couldn't notify language server: {e}");
        }
        Ok(id)
    }

    /// Prompt for a file through the gateway and open it.
    pub async fn open_file_with_prompt(&mut self) -> Option<Result<TabId, GatewayError>> {
        let path = self.gateway.prompt_open_path()?;
        Some(self.open_file(path).await)
    }

    pub fn new_file(&mut self, name: impl Into<String>) -> TabId {
        let id = self.tabs.add_tab(EditorTab::new(name));
        self.tabs.set_current_id(&id);
        id
    }

    pub fn close_file(&mut self, index: usize) -> Option<EditorTab> {
        let (id, tab) = self.tabs.close_tab(index)?;
        if tab.is_dirty() {
            tracing::warn!(tab = %id, name = tab.name(), "Closed tab with unsaved changes");
        }
        if let Some(path) = tab.path() {
            self.project.mark_file_closed(path);
        }
        Some(tab)
    }

    fn tab_for_path(&self, path: &Path) -> Option<TabId> {
        self.tabs
            .iter()
            .find(|(_, tab)| tab.path() == Some(path))
            .map(|(id, _)| id.clone())
    }

    /// Save the selected tab. `None` when no tab is selected.
    pub fn save_current(&mut self) -> Option<Result<PathBuf, GatewayError>> {
        let tab = self.tabs.current_tab_mut()?;
        let result = tab.save(self.gateway.as_ref());
        if let Ok(path) = &result
            && self.project.is_open()
        {
            self.project.mark_file_open(path);
        }
        Some(result)
    }

    pub fn save_all(&mut self) -> SaveReport {
        self.tabs.save_all(self.gateway.as_ref())
    }

    // Build, run, debug

    pub fn build(&mut self) -> BuildSubmission {
        self.build
            .build(&mut self.project, &mut self.tabs, self.gateway.as_ref())
    }

    pub async fn run(&self) -> Result<CapturedOutput, RunError> {
        self.build.run(&self.project).await
    }

    /// Load the project's executable into the debugger and run it under gdb.
    pub async fn debug(&mut self) -> Result<CapturedOutput, DebugError> {
        self.debug.load_executable(self.project.executable_path())?;
        self.debug.launch(&self.shell).await
    }

    // Language server

    /// Start the language server in the project root (or the current
    /// directory) and announce every open file. Disabled servers are skipped.
    pub async fn start_lsp(&mut self) -> Result<(), LspError> {
        if !self.lsp.settings().enabled {
            tracing::debug!("Language server disabled in config");
            return Ok(());
        }
        if self.project.is_open() {
            let root = self.project.root_directory().to_path_buf();
            self.lsp.start_in(&root).await?;
        } else {
            self.lsp.start().await?;
        }

        for (_, tab) in self.tabs.iter() {
            if let Some(path) = tab.path()
                && let Err(e) = self.lsp.did_open(path, tab.document().text()).await
            {
                tracing::warn!(path = %path.display(), "Couldn't notify language server: {e}");
            }
        }
        Ok(())
    }

    pub async fn stop_lsp(&mut self) {
        self.lsp.stop().await;
    }

    /// Send the current tab's full text to the language server.
    pub async fn sync_current(&self) -> Result<(), WorkbenchError> {
        let (path, tab) = self.current_saved_tab()?;
        self.lsp.did_change(path, tab.document().text()).await?;
        Ok(())
    }

    /// Request completions at the current tab's cursor.
    pub async fn complete_at_cursor(&self) -> Result<RequestId, WorkbenchError> {
        let (path, tab) = self.current_saved_tab()?;
        let pos = tab.document().cursor_position();
        let id = self
            .lsp
            .request_completion(path, pos.line, pos.column)
            .await?;
        Ok(id)
    }

    fn current_saved_tab(&self) -> Result<(&Path, &EditorTab), WorkbenchError> {
        let tab = self.tabs.current_tab().ok_or(WorkbenchError::NoCurrentTab)?;
        let path = tab
            .path()
            .ok_or_else(|| WorkbenchError::UnsavedTab(tab.name().to_string()))?;
        Ok((path, tab))
    }

    /// Stop the language server. Unsaved tabs are reported, not saved.
    pub async fn shutdown(&mut self) {
        if self.tabs.has_unsaved_changes() {
            tracing::warn!("Shutting down with unsaved tabs");
        }
        self.lsp.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use kiln_lsp::{LspSettings, LspState};
    use kiln_tools::ProcessError;

    use super::*;
    use crate::build::BuildSettings;

    struct EchoLauncher;

    impl Launcher for EchoLauncher {
        async fn compile(
            &self,
            command: &str,
            _working_dir: &Path,
        ) -> Result<CapturedOutput, ProcessError> {
            Ok(CapturedOutput {
                text: format!("{command}\n"),
                success: true,
                exit_code: Some(0),
            })
        }

        async fn execute(
            &self,
            program: &Path,
            _working_dir: &Path,
        ) -> Result<CapturedOutput, ProcessError> {
            Ok(CapturedOutput {
                text: format!("ran {}\n", program.display()),
                success: true,
                exit_code: Some(0),
            })
        }
    }

    fn workbench() -> Workbench<EchoLauncher> {
        let settings = LspSettings {
            enabled: false,
            ..LspSettings::default()
        };
        Workbench::from_parts(
            TabRegistry::new(),
            Box::new(DiskGateway::new()),
            BuildOrchestrator::with_launcher(
                BuildSettings::default(),
                EchoLauncher,
                Handle::current(),
            ),
            LspClient::new(settings),
            detect_shell(None),
        )
    }

    #[tokio::test]
    async fn open_file_selects_and_tracks_it() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.cpp");
        std::fs::write(&file, "int main() {}\n").unwrap();

        let mut wb = workbench();
        wb.new_project(dir.path(), "demo");
        let id = wb.open_file(&file).await.unwrap();

        assert_eq!(wb.tabs().current_id(), Some(&id));
        assert_eq!(wb.tabs().current_tab().unwrap().name(), "main.cpp");
        assert_eq!(
            wb.tabs().current_tab().unwrap().document().text(),
            "int main() {}\n"
        );
        assert!(wb.project().open_files().contains(&file));
    }

    #[tokio::test]
    async fn reopening_a_file_reuses_its_tab() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.cpp");
        std::fs::write(&file, "").unwrap();

        let mut wb = workbench();
        let first = wb.open_file(&file).await.unwrap();
        wb.new_file("scratch");
        let second = wb.open_file(&file).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(wb.tabs().len(), 2);
        assert_eq!(wb.tabs().current_id(), Some(&first));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench();
        let err = wb.open_file(dir.path().join("gone.cpp")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Read { .. }));
        assert!(wb.tabs().is_empty());
    }

    #[tokio::test]
    async fn close_file_updates_open_set() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.cpp");
        std::fs::write(&file, "").unwrap();

        let mut wb = workbench();
        wb.new_project(dir.path(), "demo");
        wb.open_file(&file).await.unwrap();
        let closed = wb.close_file(0).unwrap();

        assert_eq!(closed.path(), Some(file.as_path()));
        assert!(wb.project().open_files().is_empty());
        assert!(wb.tabs().current_index().is_none());
        assert!(wb.close_file(0).is_none());
    }

    #[tokio::test]
    async fn completion_needs_a_saved_current_tab() {
        let mut wb = workbench();
        assert!(matches!(
            wb.complete_at_cursor().await,
            Err(WorkbenchError::NoCurrentTab)
        ));

        wb.new_file("untitled");
        assert!(matches!(
            wb.complete_at_cursor().await,
            Err(WorkbenchError::UnsavedTab(name)) if name == "untitled"
        ));
    }

    #[tokio::test]
    async fn completion_requires_running_server() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.cpp");
        std::fs::write(&file, "x").unwrap();

        let mut wb = workbench();
        wb.open_file(&file).await.unwrap();
        assert!(matches!(
            wb.complete_at_cursor().await,
            Err(WorkbenchError::Lsp(LspError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn disabled_server_is_not_started() {
        let mut wb = workbench();
        wb.start_lsp().await.unwrap();
        assert_eq!(wb.lsp().state(), LspState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn build_and_run_use_project() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench();
        wb.new_project(dir.path(), "demo");
        wb.project_mut().add_source_file(dir.path().join("main.cpp"));

        let report = wb.build().into_ticket().unwrap().wait().await.unwrap();
        assert!(report.output.starts_with("g++ -std=c++20"));
        assert!(!wb.project().is_dirty());

        let out = wb.run().await.unwrap();
        assert!(out.text.starts_with("ran "));
        assert_eq!(
            wb.build_orchestrator().last_console_output().as_deref(),
            Some(out.text.as_str())
        );
    }

    #[tokio::test]
    async fn open_project_adopts_its_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::create_new(dir.path(), "demo");
        project.set_compiler("clang");
        project.save().unwrap();

        let mut wb = workbench();
        wb.open_project(project.project_file_path()).unwrap();
        assert_eq!(
            wb.build_orchestrator().settings().compiler,
            kiln_types::Compiler::Clang
        );
        assert_eq!(wb.project().name(), "demo");
    }

    #[tokio::test]
    async fn debug_without_build_reports_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench();
        wb.new_project(dir.path(), "demo");
        assert!(matches!(wb.debug().await, Err(DebugError::NotFound(_))));
    }
}
