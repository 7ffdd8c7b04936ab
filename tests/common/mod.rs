//! Shared test utilities and fixtures
//!
//! In-memory stand-ins for the compiler and the language server so the suite
//! never needs gcc or clangd installed.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_core::{DiskGateway, TabRegistry};
use kiln_engine::{BuildOrchestrator, BuildSettings, Launcher, Workbench};
use kiln_lsp::codec::{FrameBuffer, encode_frame};
use kiln_lsp::{LspClient, LspError, LspSettings, ServerProcess};
use kiln_tools::{CapturedOutput, ProcessError, detect_shell};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Compiler stand-in: records command lines and answers with a fixed output.
pub struct RecordingLauncher {
    pub commands: Mutex<Vec<String>>,
    pub programs: Mutex<Vec<PathBuf>>,
    pub output: String,
    pub gate: Semaphore,
    pub compiles: AtomicUsize,
}

impl RecordingLauncher {
    pub fn new(output: &str) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            programs: Mutex::new(Vec::new()),
            output: output.to_string(),
            gate: Semaphore::new(Semaphore::MAX_PERMITS / 2),
            compiles: AtomicUsize::new(0),
        }
    }

    /// Compiles block until [`RecordingLauncher::release`] is called.
    pub fn gated(output: &str) -> Self {
        Self {
            gate: Semaphore::new(0),
            ..Self::new(output)
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl Launcher for RecordingLauncher {
    async fn compile(
        &self,
        command: &str,
        _working_dir: &Path,
    ) -> Result<CapturedOutput, ProcessError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.to_string());
        self.gate.acquire().await.unwrap().forget();
        Ok(CapturedOutput {
            text: self.output.clone(),
            success: true,
            exit_code: Some(0),
        })
    }

    async fn execute(
        &self,
        program: &Path,
        _working_dir: &Path,
    ) -> Result<CapturedOutput, ProcessError> {
        self.programs.lock().unwrap().push(program.to_path_buf());
        Ok(CapturedOutput {
            text: "Hello from the program\n".to_string(),
            success: true,
            exit_code: Some(0),
        })
    }
}

/// The test's end of an in-memory language server.
#[derive(Default)]
pub struct Wire {
    written: Mutex<Vec<u8>>,
    server_end: tokio::sync::Mutex<Option<DuplexStream>>,
    pub spawns: AtomicUsize,
}

impl Wire {
    /// Every message the client has written so far.
    pub fn sent(&self) -> Vec<Value> {
        let mut buffer = FrameBuffer::new();
        buffer.push(&self.written.lock().unwrap());
        buffer.drain_messages().unwrap()
    }

    pub async fn reply(&self, msg: &Value) {
        let frame = encode_frame(msg).unwrap();
        let mut end = self.server_end.lock().await;
        end.as_mut()
            .expect("server not running")
            .write_all(&frame)
            .await
            .unwrap();
    }

    /// Close the server's output as if it crashed.
    pub async fn hang_up(&self) {
        *self.server_end.lock().await = None;
    }

    pub async fn wait_for(&self, pred: impl Fn(&[Value]) -> bool) -> Vec<Value> {
        for _ in 0..300 {
            let sent = self.sent();
            if pred(&sent) {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected message never sent: {:?}", self.sent());
    }
}

pub struct FakeServer {
    wire: Arc<Wire>,
    reader: Option<DuplexStream>,
    alive: bool,
}

impl FakeServer {
    pub fn new() -> (Self, Arc<Wire>) {
        let wire = Arc::new(Wire::default());
        (
            Self {
                wire: Arc::clone(&wire),
                reader: None,
                alive: false,
            },
            wire,
        )
    }
}

impl ServerProcess for FakeServer {
    type Reader = DuplexStream;

    fn spawn(&mut self, _command: &str, _args: &[String]) -> Result<(), LspError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.reader = Some(client);
        *self.wire.server_end.try_lock().unwrap() = Some(server);
        self.wire.spawns.fetch_add(1, Ordering::SeqCst);
        self.alive = true;
        Ok(())
    }

    fn take_reader(&mut self) -> Option<DuplexStream> {
        self.reader.take()
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.alive {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.wire.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn close_handles(&mut self, _grace: Duration) {
        self.alive = false;
        self.reader = None;
        *self.wire.server_end.lock().await = None;
    }
}

pub type TestWorkbench = Workbench<RecordingLauncher, FakeServer>;

/// A workbench wired to in-memory fakes. Must be called inside a runtime.
pub fn workbench(launcher: RecordingLauncher) -> (TestWorkbench, Arc<Wire>) {
    let (server, wire) = FakeServer::new();
    let settings = LspSettings {
        shutdown_timeout_ms: 200,
        ..LspSettings::default()
    };
    let wb = Workbench::from_parts(
        TabRegistry::new(),
        Box::new(DiskGateway::new()),
        BuildOrchestrator::with_launcher(BuildSettings::default(), launcher, Handle::current()),
        LspClient::with_process(settings, server),
        detect_shell(None),
    );
    (wb, wire)
}

pub fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
