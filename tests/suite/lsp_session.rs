//! Language server session driven through the workbench.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_lsp::{LspState, StopReason, document_uri};
use kiln_types::{CursorPos, RequestId};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::common::{RecordingLauncher, workbench, write};

fn method(msg: &Value) -> Option<&str> {
    msg.get("method").and_then(Value::as_str)
}

fn methods(sent: &[Value]) -> Vec<&str> {
    sent.iter().filter_map(method).collect()
}

#[tokio::test]
async fn start_announces_every_open_file() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {}\n");
    let util = write(dir.path(), "util.cpp", "int util();\n");

    let (mut wb, wire) = workbench(RecordingLauncher::new(""));
    wb.new_project(dir.path(), "demo");
    wb.open_file(&main).await.unwrap();
    wb.open_file(&util).await.unwrap();
    wb.start_lsp().await.unwrap();

    let sent = wire.sent();
    assert_eq!(
        methods(&sent),
        vec![
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "textDocument/didOpen"
        ]
    );
    let root_uri = sent[0]["params"]["rootUri"].as_str().unwrap();
    assert!(root_uri.starts_with("file://"));
    assert_eq!(
        sent[2]["params"]["textDocument"]["uri"],
        json!(document_uri(&main).unwrap())
    );
    assert_eq!(sent[3]["params"]["textDocument"]["text"], "int util();\n");

    wb.shutdown().await;
}

#[tokio::test]
async fn completion_reply_reaches_callback_with_request_id() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {\n  st\n}\n");

    let (mut wb, wire) = workbench(RecordingLauncher::new(""));
    wb.open_file(&main).await.unwrap();
    wb.start_lsp().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    wb.lsp().set_on_completion(move |id, items| {
        let labels: Vec<String> = items.iter().map(|item| item.label.clone()).collect();
        let _ = tx.send((id, labels));
    });

    wb.tabs_mut()
        .current_tab_mut()
        .unwrap()
        .document_mut()
        .set_cursor_position(CursorPos { line: 1, column: 4 });
    let id = wb.complete_at_cursor().await.unwrap();

    let sent = wire
        .wait_for(|sent| sent.iter().any(|m| method(m) == Some("textDocument/completion")))
        .await;
    let request = sent
        .iter()
        .find(|m| method(m) == Some("textDocument/completion"))
        .unwrap();
    assert_eq!(request["id"], json!(id.value()));
    assert_eq!(request["params"]["position"], json!({"line": 1, "character": 4}));

    // An untracked id still reaches the callback when it looks like a
    // completion list, but under its own id.
    wire.reply(&json!({"jsonrpc": "2.0", "id": 999, "result": [{"label": "stray"}]}))
        .await;
    wire.reply(&json!({
        "jsonrpc": "2.0",
        "id": id.value(),
        "result": {"isIncomplete": false, "items": [{"label": "std"}, {"label": "struct"}]}
    }))
    .await;

    let mut received = Vec::new();
    for _ in 0..2 {
        let got = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(got);
    }
    assert_eq!(received[0], (RequestId::new(999), vec!["stray".to_string()]));
    assert_eq!(received[1], (id, vec!["std".to_string(), "struct".to_string()]));
    assert_eq!(wb.lsp().pending_requests(), 1, "initialize is still unanswered");

    wb.shutdown().await;
}

#[tokio::test]
async fn completion_ids_increase_across_requests() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "x\n");

    let (mut wb, _wire) = workbench(RecordingLauncher::new(""));
    wb.open_file(&main).await.unwrap();
    wb.start_lsp().await.unwrap();

    let first = wb.complete_at_cursor().await.unwrap();
    let second = wb.complete_at_cursor().await.unwrap();
    assert!(second > first);
    assert_ne!(first, RequestId::new(0));

    wb.shutdown().await;
}

#[tokio::test]
async fn published_diagnostics_show_up_in_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() { return x; }\n");
    let uri = document_uri(&main).unwrap();

    let (mut wb, wire) = workbench(RecordingLauncher::new(""));
    wb.open_file(&main).await.unwrap();
    wb.start_lsp().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    wb.lsp().set_on_diagnostics(move |uri, diags| {
        let _ = tx.send((uri.to_string(), diags.len()));
    });

    wire.reply(&json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": {
            "uri": uri,
            "diagnostics": [
                {
                    "range": {"start": {"line": 0, "character": 20}, "end": {"line": 0, "character": 21}},
                    "severity": 1,
                    "source": "clang",
                    "message": "use of undeclared identifier 'x'"
                },
                {
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}},
                    "severity": 2,
                    "message": "unused"
                }
            ]
        }
    }))
    .await;

    let (got_uri, count) = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got_uri, uri);
    assert_eq!(count, 2);

    let snapshot = wb.lsp().diagnostics_snapshot();
    assert_eq!(snapshot.error_count(), 1);
    assert_eq!(snapshot.warning_count(), 1);
    assert_eq!(snapshot.files()[0].0, uri);

    wb.shutdown().await;
}

#[tokio::test]
async fn server_exit_fires_stopped_once_and_allows_restart() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {}\n");

    let (mut wb, wire) = workbench(RecordingLauncher::new(""));
    wb.open_file(&main).await.unwrap();
    wb.start_lsp().await.unwrap();

    let stops = Arc::new(AtomicUsize::new(0));
    let reasons = Arc::new(Mutex::new(Vec::new()));
    {
        let stops = Arc::clone(&stops);
        let reasons = Arc::clone(&reasons);
        wb.lsp().set_on_stopped(move |reason| {
            stops.fetch_add(1, Ordering::SeqCst);
            reasons.lock().unwrap().push(reason.clone());
        });
    }

    wire.hang_up().await;
    for _ in 0..300 {
        if wb.lsp().state() == LspState::Stopped {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(wb.lsp().state(), LspState::Stopped);
    assert_eq!(wb.lsp().stop_reason(), Some(StopReason::Exited));
    assert!(wb.complete_at_cursor().await.is_err());

    // Stopping an already dead session must not report a second stop.
    wb.stop_lsp().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(*reasons.lock().unwrap(), vec![StopReason::Exited]);

    wb.start_lsp().await.unwrap();
    assert!(wb.lsp().is_running());
    assert_eq!(wire.spawns.load(Ordering::SeqCst), 2);

    wb.shutdown().await;
}
