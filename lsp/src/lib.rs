//! Language server client for kiln.
//!
//! Speaks `Content-Length`-framed JSON-RPC to a server child process, routes
//! responses by request id, and surfaces completions and diagnostics through
//! callbacks.

pub mod codec;
pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod protocol;

mod client;
mod process;

pub use client::{LspClient, document_uri};
pub use process::{ServerProcess, StdioProcess};
pub use protocol::{file_uri_to_path, path_to_file_uri};
pub use types::{
    CompletionItem, Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, LspError, LspSettings,
    LspState, StopReason,
};
