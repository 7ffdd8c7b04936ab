//! Public types consumed by the engine.
//!
//! The engine builds [`LspSettings`] from its config, drives an
//! [`LspClient`](crate::LspClient), and reads [`Diagnostic`]s and
//! [`CompletionItem`]s handed back through callbacks or snapshots.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LspError {
    #[error("failed to start language server `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write to language server: {0}")]
    Write(#[source] std::io::Error),
    #[error("language server is not running")]
    NotRunning,
    #[error("failed to encode LSP message: {0}")]
    Serialize(#[source] anyhow::Error),
    #[error("cannot convert {0} to a file URI")]
    Uri(std::path::PathBuf),
}

fn default_enabled() -> bool {
    true
}

fn default_command() -> String {
    "clangd".to_string()
}

fn default_language_id() -> String {
    "cpp".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

/// How to launch and talk to the language server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LspSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Executable name or path, resolved through `PATH`.
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Language identifier sent with `didOpen`.
    #[serde(default = "default_language_id")]
    pub language_id: String,
    /// Grace period for the server to exit on `stop()` before it is killed.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for LspSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            command: default_command(),
            args: Vec::new(),
            language_id: default_language_id(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl LspSettings {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Lifecycle of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LspState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The server closed its output stream.
    Exited,
    /// Reading from the server failed.
    Failed(String),
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    /// 0-indexed.
    line: u32,
    /// 0-indexed.
    character: u32,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: impl Into<String>,
        line: u32,
        character: u32,
        source: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            line,
            character,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn character(&self) -> u32 {
        self.character
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `file:line:col: severity: [source] message`, 1-indexed for display.
    #[must_use]
    pub fn display_with_file(&self, file: &str) -> String {
        format!(
            "{file}:{}:{}: {}: [{}] {}",
            self.line + 1,
            self.character + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// One completion candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    pub detail: Option<String>,
    /// `insertText`, or `textEdit.newText` when the server sent no `insertText`.
    pub insert_text: String,
}

/// Immutable copy of the diagnostics store, files with errors first.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    files: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(String, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    /// `(uri, diagnostics)` pairs.
    #[must_use]
    pub fn files(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Compact status like "E:3 W:5"; empty when there is nothing to report.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
