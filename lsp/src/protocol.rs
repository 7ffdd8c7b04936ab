//! JSON-RPC message shapes exchanged with the language server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CompletionItem, Diagnostic, DiagnosticSeverity};

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "initialized";
pub const SHUTDOWN: &str = "shutdown";
pub const EXIT: &str = "exit";
pub const COMPLETION: &str = "textDocument/completion";
pub const DID_OPEN: &str = "textDocument/didOpen";
pub const DID_CHANGE: &str = "textDocument/didChange";
pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

/// JSON-RPC "Method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Version sent with every `didOpen`.
pub const DID_OPEN_VERSION: i32 = 1;
/// Version sent with every `didChange`. Not incremented per edit.
pub const DID_CHANGE_VERSION: i32 = 2;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn initialize_params(root_uri: &str) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "didSave": false
                },
                "completion": {
                    "completionItem": { "snippetSupport": false }
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": DID_OPEN_VERSION,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": DID_CHANGE_VERSION
        },
        "contentChanges": [{ "text": text }]
    })
}

pub(crate) fn completion_params(uri: &str, line: u32, character: u32) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn method_not_found(id: &Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// A decoded inbound message.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: Value,
        result: Option<Value>,
        error: Option<Value>,
    },
    ServerRequest {
        id: Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

pub(crate) fn classify(frame: &Value) -> Option<Incoming> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame.get("method").and_then(Value::as_str).map(String::from);
    let result = frame.get("result");
    let error = frame.get("error");

    match (id, method) {
        (Some(id), Some(method)) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (Some(id), None) if result.is_some() || error.is_some() => Some(Incoming::Response {
            id: id.clone(),
            result: result.cloned(),
            error: error.cloned(),
        }),
        _ => None,
    }
}

/// Interpret a response `result` as a completion list.
///
/// Accepts a `CompletionList` (object with an `items` array) or a bare array.
/// Any other shape is `None`.
pub(crate) fn parse_completion_result(result: &Value) -> Option<Vec<CompletionItem>> {
    let items = match result {
        Value::Array(items) => items,
        Value::Object(obj) => obj.get("items")?.as_array()?,
        _ => return None,
    };
    Some(items.iter().map(completion_item).collect())
}

fn completion_item(raw: &Value) -> CompletionItem {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(String::from);
    let insert_text = text("insertText")
        .or_else(|| {
            raw.get("textEdit")
                .and_then(|edit| edit.get("newText"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_default();
    CompletionItem {
        label: text("label").unwrap_or_default(),
        detail: text("detail"),
        insert_text,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LspDiagnostic {
    range: LspRange,
    severity: Option<u64>,
    source: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LspRange {
    start: LspPosition,
}

#[derive(Debug, Deserialize)]
struct LspPosition {
    line: u32,
    character: u32,
}

impl PublishDiagnosticsParams {
    /// Entries that fail to decode are logged and dropped.
    pub fn decoded(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .iter()
            .filter_map(|raw| match LspDiagnostic::deserialize(raw) {
                Ok(d) => Some(d.into_diagnostic()),
                Err(e) => {
                    tracing::debug!(uri = %self.uri, "Skipping malformed diagnostic: {e}");
                    None
                }
            })
            .collect()
    }
}

impl LspDiagnostic {
    fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message,
            self.range.start.line,
            self.range.start.character,
            self.source.unwrap_or_else(|| String::from("unknown")),
        )
    }
}

pub fn path_to_file_uri(path: &Path) -> Option<url::Url> {
    url::Url::from_file_path(path).ok()
}

pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri).ok().and_then(|u| u.to_file_path().ok())
}
