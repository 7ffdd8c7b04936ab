//! Editor model for kiln.
//!
//! Text documents with undo/redo, the tab registry that addresses them by id,
//! the file persistence boundary, and the project description the build
//! consumes.

mod document;
mod gateway;
pub mod project;
mod registry;
mod tab;

pub use document::Document;
pub use gateway::{DiskGateway, FileGateway, GatewayError};
pub use project::{PROJECT_EXTENSION, Project, ProjectError};
pub use registry::{IdSource, RandomIdSource, SaveReport, TabRegistry};
pub use tab::EditorTab;
