//! Project model and its JSON persistence.

use std::collections::BTreeSet;
use std::env::consts::EXE_SUFFIX;
use std::io;
use std::path::{Path, PathBuf};

use kiln_types::{Compiler, UnknownCompiler};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROJECT_EXTENSION: &str = "kproj.json";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("failed to read project {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse project {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write project {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize project: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("no project is open")]
    NotOpen,
}

/// On-disk shape. Every field is optional on read.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProjectFile {
    name: String,
    project_file_path: String,
    root_directory: Option<String>,
    source_files: Vec<String>,
    include_dirs: Vec<String>,
    compiler: String,
    compiler_flags: Vec<String>,
    open_files: Vec<String>,
    dirty: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Project {
    name: String,
    project_file_path: PathBuf,
    root_directory: PathBuf,
    /// Insertion-ordered, no duplicates.
    source_files: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    compiler: String,
    compiler_flags: Vec<String>,
    open_files: BTreeSet<PathBuf>,
    dirty: bool,
    open: bool,
}

impl Project {
    /// A fresh, open, unsaved project rooted at `root`.
    #[must_use]
    pub fn create_new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        let root = root.into();
        let name = name.into();
        Self {
            project_file_path: root.join(format!("{name}.{PROJECT_EXTENSION}")),
            root_directory: root,
            name,
            compiler: Compiler::default().name().to_string(),
            dirty: true,
            open: true,
            ..Self::default()
        }
    }

    /// Load a project file. Missing fields take their defaults and the root
    /// directory defaults to the file's parent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ProjectError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ProjectFile =
            serde_json::from_str(&raw).map_err(|source| ProjectError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let root_directory = file.root_directory.map_or_else(
            || path.parent().map(Path::to_path_buf).unwrap_or_default(),
            PathBuf::from,
        );

        tracing::debug!(path = %path.display(), name = %file.name, "Project opened");
        Ok(Self {
            name: file.name,
            project_file_path: path.to_path_buf(),
            root_directory,
            source_files: dedup_paths(file.source_files),
            include_dirs: dedup_paths(file.include_dirs),
            compiler: file.compiler,
            compiler_flags: file.compiler_flags,
            open_files: file.open_files.into_iter().map(PathBuf::from).collect(),
            dirty: file.dirty,
            open: true,
        })
    }

    /// Write to the project file path and clear the dirty flag.
    pub fn save(&mut self) -> Result<(), ProjectError> {
        if !self.open {
            return Err(ProjectError::NotOpen);
        }
        self.dirty = false;
        let json = serde_json::to_string_pretty(&self.to_file()).map_err(ProjectError::Serialize)?;
        if let Err(source) = kiln_utils::atomic_write(&self.project_file_path, json.as_bytes()) {
            self.dirty = true;
            return Err(ProjectError::Write {
                path: self.project_file_path.clone(),
                source,
            });
        }
        tracing::debug!(path = %self.project_file_path.display(), "Project saved");
        Ok(())
    }

    /// Re-point the project file and save there. The root directory is kept.
    pub fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<(), ProjectError> {
        let previous = std::mem::replace(&mut self.project_file_path, path.into());
        self.save().inspect_err(|_| self.project_file_path = previous)
    }

    pub fn close(&mut self) {
        *self = Self::default();
    }

    fn to_file(&self) -> ProjectFile {
        ProjectFile {
            name: self.name.clone(),
            project_file_path: path_string(&self.project_file_path),
            root_directory: Some(path_string(&self.root_directory)),
            source_files: self.source_files.iter().map(|p| path_string(p)).collect(),
            include_dirs: self.include_dirs.iter().map(|p| path_string(p)).collect(),
            compiler: self.compiler.clone(),
            compiler_flags: self.compiler_flags.clone(),
            open_files: self.open_files.iter().map(|p| path_string(p)).collect(),
            dirty: self.dirty,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn project_file_path(&self) -> &Path {
        &self.project_file_path
    }

    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    #[must_use]
    pub fn source_files(&self) -> &[PathBuf] {
        &self.source_files
    }

    #[must_use]
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    #[must_use]
    pub fn compiler_name(&self) -> &str {
        &self.compiler
    }

    /// The configured compiler, if the stored identifier is recognised.
    pub fn compiler(&self) -> Result<Compiler, UnknownCompiler> {
        self.compiler.parse()
    }

    #[must_use]
    pub fn compiler_flags(&self) -> &[String] {
        &self.compiler_flags
    }

    #[must_use]
    pub fn open_files(&self) -> &BTreeSet<PathBuf> {
        &self.open_files
    }

    /// Append `file` unless it is already listed. Returns whether it was added;
    /// only an actual insertion marks the project dirty.
    pub fn add_source_file(&mut self, file: impl Into<PathBuf>) -> bool {
        let file = file.into();
        if self.contains_file(&file) {
            return false;
        }
        self.source_files.push(file);
        self.dirty = true;
        true
    }

    pub fn remove_file(&mut self, file: &Path) -> bool {
        let before = self.source_files.len();
        self.source_files.retain(|f| f != file);
        let removed = self.source_files.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    #[must_use]
    pub fn contains_file(&self, file: &Path) -> bool {
        self.source_files.iter().any(|f| f == file)
    }

    pub fn add_include_dir(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.include_dirs.contains(&dir) {
            return false;
        }
        self.include_dirs.push(dir);
        self.dirty = true;
        true
    }

    pub fn set_compiler(&mut self, compiler: impl Into<String>) {
        self.compiler = compiler.into();
        self.dirty = true;
    }

    pub fn set_compiler_flags(&mut self, flags: Vec<String>) {
        self.compiler_flags = flags;
        self.dirty = true;
    }

    pub fn mark_file_open(&mut self, file: impl Into<PathBuf>) {
        if self.open_files.insert(file.into()) {
            self.dirty = true;
        }
    }

    pub fn mark_file_closed(&mut self, file: &Path) {
        if self.open_files.remove(file) {
            self.dirty = true;
        }
    }

    /// Where the linked binary is expected: `<root>/<name>` plus the platform
    /// executable suffix.
    #[must_use]
    pub fn executable_path(&self) -> PathBuf {
        self.root_directory.join(format!("{}{EXE_SUFFIX}", self.name))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn dedup_paths(raw: Vec<String>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(raw.len());
    for p in raw {
        let p = PathBuf::from(p);
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}
