//! Core domain types for kiln.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod compiler;
mod ids;

pub use compiler::{CompileMode, Compiler, CompilerFlag, UnknownCompiler, UnknownCompilerFlag};
pub use ids::{CursorPos, RequestId, TabId};
