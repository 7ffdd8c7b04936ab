//! File persistence boundary.
//!
//! Dialogs and disk access are external collaborators; the editor model only
//! talks to them through [`FileGateway`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no path chosen")]
    Cancelled,
}

/// Where a tab's bytes live, and how to ask the user for a location.
///
/// Prompt methods return `None` when the user cancels or when no dialog is
/// available.
pub trait FileGateway: Send + Sync {
    fn read_file(&self, path: &Path) -> Result<String, GatewayError>;

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), GatewayError>;

    fn prompt_open_path(&self) -> Option<PathBuf>;

    /// Ask for a destination for a buffer that has never been saved.
    fn prompt_save_path(&self, suggested_name: &str) -> Option<PathBuf>;

    fn prompt_folder(&self) -> Option<PathBuf>;
}

/// Plain filesystem gateway with no interactive dialogs.
///
/// When constructed with [`DiskGateway::with_untitled_dir`], unsaved buffers are
/// given fresh names inside that directory instead of prompting.
#[derive(Debug, Default)]
pub struct DiskGateway {
    untitled_dir: Option<PathBuf>,
    untitled_counter: AtomicUsize,
}

impl DiskGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_untitled_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            untitled_dir: Some(dir.into()),
            untitled_counter: AtomicUsize::new(0),
        }
    }
}

impl FileGateway for DiskGateway {
    fn read_file(&self, path: &Path) -> Result<String, GatewayError> {
        std::fs::read_to_string(path).map_err(|source| GatewayError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), GatewayError> {
        kiln_utils::atomic_write(path, contents.as_bytes()).map_err(|source| GatewayError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn prompt_open_path(&self) -> Option<PathBuf> {
        tracing::debug!("No open dialog available");
        None
    }

    fn prompt_save_path(&self, suggested_name: &str) -> Option<PathBuf> {
        let dir = self.untitled_dir.as_ref()?;
        let stem = sanitize_file_name(suggested_name);
        loop {
            let n = self.untitled_counter.fetch_add(1, Ordering::Relaxed);
            let candidate = if n == 0 {
                dir.join(&stem)
            } else {
                dir.join(format!("{n}-{stem}"))
            };
            if !candidate.exists() {
                return Some(candidate);
            }
        }
    }

    fn prompt_folder(&self) -> Option<PathBuf> {
        tracing::debug!("No folder dialog available");
        None
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "untitled.cpp".to_string()
    } else {
        cleaned.to_string()
    }
}
