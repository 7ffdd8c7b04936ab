use std::path::{Path, PathBuf};

use crate::document::Document;
use crate::gateway::{FileGateway, GatewayError};

/// One open document plus where it lives on disk.
///
/// A tab with no path has never been saved; saving it asks the gateway for a
/// destination.
#[derive(Debug, Clone, Default)]
pub struct EditorTab {
    name: String,
    path: Option<PathBuf>,
    document: Document,
}

impl EditorTab {
    /// An unsaved, empty tab.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            document: Document::new(),
        }
    }

    /// A tab backed by `path` whose buffer holds `text` (clean).
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: display_name(&path),
            path: Some(path),
            document: Document::from_text(text),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Point the tab at a new file. The display name follows the file name.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.name = display_name(&path);
        self.path = Some(path);
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.document.is_dirty()
    }

    /// Write the buffer to its path, prompting for one if the tab is unsaved.
    ///
    /// The path and name are only updated once the write succeeds.
    pub fn save(&mut self, gateway: &dyn FileGateway) -> Result<PathBuf, GatewayError> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => gateway
                .prompt_save_path(&self.name)
                .ok_or(GatewayError::Cancelled)?,
        };

        gateway.write_file(&path, self.document.text())?;

        if self.path.as_deref() != Some(path.as_path()) {
            self.set_path(path.clone());
        }
        self.document.mark_clean();
        Ok(path)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
