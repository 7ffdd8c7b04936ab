//! Language server client: session lifecycle, request routing, callbacks.
//!
//! One [`LspClient`] owns one server process at a time. Each session runs two
//! tasks. The writer drains an outbound queue of whole frames, so concurrent
//! senders never interleave partial frames. The reader owns the server's
//! output stream and is the only place inbound messages are handled; callbacks
//! run on that task. The reader never waits on a write: replies to server
//! requests are queued, so a server blocked on a full stdout pipe is always
//! drained even while a large write to its stdin is in progress.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use kiln_types::RequestId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, encode_frame};
use crate::diagnostics::DiagnosticsStore;
use crate::process::{ServerProcess, StdioProcess};
use crate::protocol::{self, Incoming, Notification, PublishDiagnosticsParams, Request};
use crate::types::{
    CompletionItem, Diagnostic, DiagnosticsSnapshot, LspError, LspSettings, LspState, StopReason,
};

type DiagnosticsCallback = Arc<dyn Fn(&str, &[Diagnostic]) + Send + Sync>;
type CompletionCallback = Arc<dyn Fn(RequestId, &[CompletionItem]) + Send + Sync>;
type StoppedCallback = Arc<dyn Fn(&StopReason) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    diagnostics: Option<DiagnosticsCallback>,
    completion: Option<CompletionCallback>,
    stopped: Option<StoppedCallback>,
}

/// What an outstanding request id was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Initialize,
    Completion,
    Shutdown,
}

/// One framed message waiting for the writer task.
struct Outgoing {
    frame: Vec<u8>,
    /// `None` for fire-and-forget replies sent from the reader task.
    ack: Option<oneshot::Sender<io::Result<()>>>,
}

struct Shared<P> {
    /// Held by the writer task for the duration of every write.
    process: tokio::sync::Mutex<P>,
    /// Sender half of the current session's writer queue.
    outbox: std::sync::Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    state: std::sync::Mutex<LspState>,
    /// Never reset, so ids keep increasing across restarts.
    next_id: AtomicU64,
    pending: std::sync::Mutex<HashMap<u64, RequestKind>>,
    callbacks: RwLock<Callbacks>,
    diagnostics: std::sync::Mutex<DiagnosticsStore>,
    stop_reason: std::sync::Mutex<Option<StopReason>>,
    session: AtomicU64,
}

impl<P: ServerProcess> Shared<P> {
    fn state(&self) -> LspState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LspState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, RequestKind>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> std::sync::RwLockReadGuard<'_, Callbacks> {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Callbacks> {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// End `session` with `reason`, once. Later calls for the same session and
    /// calls for an older session are ignored.
    fn finish_session(&self, session: u64, reason: StopReason) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == LspState::Stopped || self.session.load(Ordering::SeqCst) != session {
                return;
            }
            *state = LspState::Stopped;
        }
        self.pending().clear();
        *self.stop_reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());

        match &reason {
            StopReason::Requested => tracing::info!("Language server stopped"),
            StopReason::Exited => tracing::warn!("Language server exited"),
            StopReason::Failed(e) => tracing::warn!("Language server connection failed: {e}"),
        }

        let callback = self.callbacks().stopped.clone();
        if let Some(callback) = callback {
            callback(&reason);
        }
    }

    fn enqueue(&self, outgoing: Outgoing) -> Result<(), LspError> {
        let outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        match outbox.as_ref() {
            Some(tx) => tx.send(outgoing).map_err(|_| LspError::NotRunning),
            None => Err(LspError::NotRunning),
        }
    }

    /// Queue `msg` and wait until the writer has handed it to the server.
    async fn write_message(&self, msg: &Value) -> Result<(), LspError> {
        let frame = encode_frame(msg).map_err(LspError::Serialize)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(Outgoing {
            frame,
            ack: Some(ack_tx),
        })?;
        match ack_rx.await {
            Ok(result) => result.map_err(LspError::Write),
            Err(_) => Err(LspError::NotRunning),
        }
    }

    /// Queue `msg` without waiting for the write.
    fn post_message(&self, msg: &Value) -> Result<(), LspError> {
        let frame = encode_frame(msg).map_err(LspError::Serialize)?;
        self.enqueue(Outgoing { frame, ack: None })
    }

    fn close_outbox(&self) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn send_request(
        &self,
        method: &'static str,
        params: Option<Value>,
        kind: RequestKind,
    ) -> Result<u64, LspError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending().insert(id, kind);

        let request = Request::new(id, method, params);
        let msg = serde_json::to_value(&request).map_err(|e| LspError::Serialize(e.into()))?;
        if let Err(e) = self.write_message(&msg).await {
            self.pending().remove(&id);
            return Err(e);
        }
        tracing::trace!(id, method, "LSP request sent");
        Ok(id)
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), LspError> {
        let notification = Notification::new(method, params);
        let msg =
            serde_json::to_value(&notification).map_err(|e| LspError::Serialize(e.into()))?;
        self.write_message(&msg).await
    }

    fn dispatch(&self, frame: &Value) {
        let Some(incoming) = protocol::classify(frame) else {
            tracing::trace!("Ignoring unrecognised JSON-RPC message");
            return;
        };

        match incoming {
            Incoming::Response { id, result, error } => self.on_response(&id, result, error),
            Incoming::ServerRequest { id, method } => {
                // Servers block on some requests (registerCapability, configuration)
                // until they get an answer.
                tracing::debug!(%method, "Server request not supported, replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                if let Err(e) = self.post_message(&reply) {
                    tracing::warn!("Failed to answer server request {method}: {e}");
                }
            }
            Incoming::Notification { method, params } => {
                if method == protocol::PUBLISH_DIAGNOSTICS {
                    self.on_publish_diagnostics(params);
                } else {
                    tracing::trace!(%method, "Ignoring notification");
                }
            }
        }
    }

    fn on_response(&self, id: &Value, result: Option<Value>, error: Option<Value>) {
        let Some(id) = id.as_u64() else {
            tracing::trace!(%id, "Ignoring response with non-numeric id");
            return;
        };
        let kind = self.pending().remove(&id);

        if let Some(error) = error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            tracing::warn!(id, ?kind, "LSP request failed: {message}");
            return;
        }
        let result = result.unwrap_or(Value::Null);

        match kind {
            Some(RequestKind::Completion) => {
                let items = protocol::parse_completion_result(&result).unwrap_or_default();
                self.deliver_completion(id, &items);
            }
            Some(RequestKind::Initialize) => {
                let server = result
                    .pointer("/serverInfo/name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                tracing::info!(server, "Language server initialized");
            }
            Some(RequestKind::Shutdown) => tracing::debug!("Shutdown acknowledged"),
            // Untracked ids keep the shape-based interpretation.
            None => match protocol::parse_completion_result(&result) {
                Some(items) => self.deliver_completion(id, &items),
                None => tracing::trace!(id, "Ignoring untracked response"),
            },
        }
    }

    fn deliver_completion(&self, id: u64, items: &[CompletionItem]) {
        let callback = self.callbacks().completion.clone();
        if let Some(callback) = callback {
            callback(RequestId::new(id), items);
        }
    }

    fn on_publish_diagnostics(&self, params: Option<Value>) {
        let Some(params) = params else {
            return;
        };
        let params: PublishDiagnosticsParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!("Failed to parse publishDiagnostics: {e}");
                return;
            }
        };
        let items = params.decoded();
        tracing::debug!(uri = %params.uri, count = items.len(), "Diagnostics published");

        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(&params.uri, items.clone());

        let callback = self.callbacks().diagnostics.clone();
        if let Some(callback) = callback {
            callback(&params.uri, &items);
        }
    }
}

async fn read_loop<P: ServerProcess>(shared: Arc<Shared<P>>, reader: P::Reader, session: u64) {
    let mut frames = FrameReader::new(reader);
    let failure = loop {
        match frames.read_message().await {
            Ok(Some(msg)) => shared.dispatch(&msg),
            Ok(None) => break None,
            Err(e) => break Some(format!("{e:#}")),
        }
    };

    let reason = match failure {
        Some(e) => StopReason::Failed(e),
        None if shared.state() == LspState::Stopping => StopReason::Requested,
        None => StopReason::Exited,
    };
    shared.finish_session(session, reason);
}

async fn write_loop<P: ServerProcess>(
    shared: Arc<Shared<P>>,
    mut outbox: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(Outgoing { frame, ack }) = outbox.recv().await {
        let result = shared.process.lock().await.write_raw(&frame).await;
        match ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::warn!("LSP write error: {e}");
                }
            }
        }
    }
}

pub struct LspClient<P: ServerProcess = StdioProcess> {
    settings: LspSettings,
    shared: Arc<Shared<P>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl LspClient<StdioProcess> {
    #[must_use]
    pub fn new(settings: LspSettings) -> Self {
        Self::with_process(settings, StdioProcess::new())
    }
}

impl<P: ServerProcess> LspClient<P> {
    pub fn with_process(settings: LspSettings, process: P) -> Self {
        Self {
            settings,
            shared: Arc::new(Shared {
                process: tokio::sync::Mutex::new(process),
                outbox: std::sync::Mutex::new(None),
                state: std::sync::Mutex::new(LspState::Stopped),
                next_id: AtomicU64::new(1),
                pending: std::sync::Mutex::new(HashMap::new()),
                callbacks: RwLock::new(Callbacks::default()),
                diagnostics: std::sync::Mutex::new(DiagnosticsStore::new()),
                stop_reason: std::sync::Mutex::new(None),
                session: AtomicU64::new(0),
            }),
            reader_task: None,
            writer_task: None,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &LspSettings {
        &self.settings
    }

    #[must_use]
    pub fn state(&self) -> LspState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LspState::Running
    }

    /// Why the most recent session ended, if one has.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Called on the reader task with the document URI and its full list of
    /// diagnostics.
    pub fn set_on_diagnostics(&self, f: impl Fn(&str, &[Diagnostic]) + Send + Sync + 'static) {
        self.shared.callbacks_mut().diagnostics = Some(Arc::new(f));
    }

    /// Called on the reader task with the id returned by
    /// [`request_completion`](Self::request_completion).
    pub fn set_on_completion(
        &self,
        f: impl Fn(RequestId, &[CompletionItem]) + Send + Sync + 'static,
    ) {
        self.shared.callbacks_mut().completion = Some(Arc::new(f));
    }

    /// Called once per session when it ends, whatever the cause.
    pub fn set_on_stopped(&self, f: impl Fn(&StopReason) + Send + Sync + 'static) {
        self.shared.callbacks_mut().stopped = Some(Arc::new(f));
    }

    #[must_use]
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Requests sent and not yet answered.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }

    /// Start with the current directory as the workspace root.
    pub async fn start(&mut self) -> Result<(), LspError> {
        let root = std::env::current_dir().map_err(|source| LspError::Spawn {
            command: self.settings.command.clone(),
            source,
        })?;
        self.start_in(&root).await
    }

    /// Spawn the server and send the `initialize` handshake. A no-op when a
    /// session is already running.
    ///
    /// `initialized` follows `initialize` immediately; the client does not
    /// wait for the server's answer before using the session.
    pub async fn start_in(&mut self, root: &Path) -> Result<(), LspError> {
        if self.is_running() {
            return Ok(());
        }
        self.reap().await;

        let root_uri =
            protocol::path_to_file_uri(root).ok_or_else(|| LspError::Uri(root.to_path_buf()))?;

        self.shared.set_state(LspState::Starting);
        let reader = {
            let mut process = self.shared.process.lock().await;
            process
                .spawn(&self.settings.command, &self.settings.args)
                .map(|()| process.take_reader())
        };
        let reader = match reader {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                self.shared.set_state(LspState::Stopped);
                return Err(LspError::Spawn {
                    command: self.settings.command.clone(),
                    source: std::io::Error::other("server has no output stream"),
                });
            }
            Err(e) => {
                self.shared.set_state(LspState::Stopped);
                tracing::warn!("{e}");
                return Err(e);
            }
        };

        let session = self.shared.session.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .shared
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shared
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        *self
            .shared
            .outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outbox_tx);
        self.writer_task = Some(tokio::spawn(write_loop(
            Arc::clone(&self.shared),
            outbox_rx,
        )));
        self.shared.set_state(LspState::Running);
        self.reader_task = Some(tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            reader,
            session,
        )));
        tracing::info!(
            command = %self.settings.command,
            root = %root.display(),
            "Language server started"
        );

        let handshake = async {
            self.shared
                .send_request(
                    protocol::INITIALIZE,
                    Some(protocol::initialize_params(root_uri.as_str())),
                    RequestKind::Initialize,
                )
                .await?;
            self.shared
                .send_notification(protocol::INITIALIZED, Some(serde_json::json!({})))
                .await
        };
        if let Err(e) = handshake.await {
            tracing::warn!("LSP handshake failed: {e}");
            self.stop().await;
            return Err(e);
        }
        Ok(())
    }

    /// Shut the session down and wait for its tasks. Safe to call when the
    /// server already died or was never started.
    pub async fn stop(&mut self) {
        if self.state() == LspState::Stopped
            && self.reader_task.is_none()
            && self.writer_task.is_none()
        {
            return;
        }
        let session = self.shared.session.load(Ordering::SeqCst);
        let grace = self.settings.shutdown_timeout();

        if matches!(self.state(), LspState::Running | LspState::Starting) {
            self.shared.set_state(LspState::Stopping);
            if self.server_alive() {
                self.send_goodbye(grace).await;
            } else {
                tracing::debug!("Language server already gone, skipping shutdown");
            }
        }

        self.shared.close_outbox();
        if let Some(mut task) = self.writer_task.take()
            && tokio::time::timeout(grace, &mut task).await.is_err()
        {
            tracing::debug!("LSP writer stuck, aborting");
            task.abort();
            let _ = task.await;
        }
        self.shared.process.lock().await.close_handles(grace).await;

        if let Some(mut task) = self.reader_task.take()
            && tokio::time::timeout(grace, &mut task).await.is_err()
        {
            tracing::debug!("LSP reader did not finish, aborting");
            task.abort();
        }
        self.shared.finish_session(session, StopReason::Requested);
    }

    /// `shutdown` then `exit`, bounded by `grace` so a server that stopped
    /// reading its stdin cannot hold up `stop()`.
    async fn send_goodbye(&self, grace: std::time::Duration) {
        let goodbye = async {
            self.shared
                .send_request(protocol::SHUTDOWN, None, RequestKind::Shutdown)
                .await?;
            self.shared.send_notification(protocol::EXIT, None).await
        };
        match tokio::time::timeout(grace, goodbye).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Failed to send shutdown: {e}"),
            Err(_) => tracing::debug!("Timed out sending shutdown"),
        }
    }

    /// A writer holding the process lock means the child is still reading.
    fn server_alive(&self) -> bool {
        match self.shared.process.try_lock() {
            Ok(mut process) => process.is_alive(),
            Err(_) => true,
        }
    }

    /// Join whatever is left of a previous session.
    async fn reap(&mut self) {
        self.shared.close_outbox();
        for task in [self.reader_task.take(), self.writer_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
            let _ = task.await;
        }
        let grace = self.settings.shutdown_timeout();
        self.shared.process.lock().await.close_handles(grace).await;
    }

    fn ensure_running(&self) -> Result<(), LspError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(LspError::NotRunning)
        }
    }

    /// Ask for completions at a 0-indexed position. The returned id is the one
    /// the completion callback will be invoked with.
    pub async fn request_completion(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<RequestId, LspError> {
        let uri = document_uri(path)?;
        self.request_completion_uri(&uri, line, character).await
    }

    pub async fn request_completion_uri(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<RequestId, LspError> {
        self.ensure_running()?;
        let id = self
            .shared
            .send_request(
                protocol::COMPLETION,
                Some(protocol::completion_params(uri, line, character)),
                RequestKind::Completion,
            )
            .await?;
        Ok(RequestId::new(id))
    }

    pub async fn did_open(&self, path: &Path, text: &str) -> Result<(), LspError> {
        let uri = document_uri(path)?;
        self.did_open_uri(&uri, text).await
    }

    pub async fn did_open_uri(&self, uri: &str, text: &str) -> Result<(), LspError> {
        self.ensure_running()?;
        let params = protocol::did_open_params(uri, &self.settings.language_id, text);
        self.shared
            .send_notification(protocol::DID_OPEN, Some(params))
            .await
    }

    /// Replace the server's copy of the document with `text`.
    pub async fn did_change(&self, path: &Path, text: &str) -> Result<(), LspError> {
        let uri = document_uri(path)?;
        self.did_change_uri(&uri, text).await
    }

    pub async fn did_change_uri(&self, uri: &str, text: &str) -> Result<(), LspError> {
        self.ensure_running()?;
        self.shared
            .send_notification(protocol::DID_CHANGE, Some(protocol::did_change_params(uri, text)))
            .await
    }
}

impl<P: ServerProcess> Drop for LspClient<P> {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}

/// `file://` URI for `path`.
pub fn document_uri(path: &Path) -> Result<String, LspError> {
    protocol::path_to_file_uri(path)
        .map(String::from)
        .ok_or_else(|| LspError::Uri(path.to_path_buf()))
}
