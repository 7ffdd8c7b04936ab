//! The language server as a child process.
//!
//! [`ServerProcess`] is the whole surface the client needs from the OS:
//! spawn, write bytes, hand over the output stream, check liveness, and
//! tear down. Platform differences stay behind it.

use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::LspError;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;

pub trait ServerProcess: Send + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;

    /// Start `command`, resolving it through `PATH` as needed.
    fn spawn(&mut self, command: &str, args: &[String]) -> Result<(), LspError>;

    /// The server's output stream. Yields `Some` once per successful spawn.
    fn take_reader(&mut self) -> Option<Self::Reader>;

    fn write_raw(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    fn is_alive(&mut self) -> bool;

    /// Close our end of the pipes and reap the child, killing it if it has
    /// not exited within `grace`. Safe to call when nothing is running.
    fn close_handles(&mut self, grace: Duration) -> impl Future<Output = ()> + Send;
}

/// A real child process talking over stdin/stdout.
#[derive(Debug, Default)]
pub struct StdioProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl StdioProcess {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerProcess for StdioProcess {
    type Reader = ChildStdout;

    fn spawn(&mut self, command: &str, args: &[String]) -> Result<(), LspError> {
        let program = which::which(command).map_err(|e| LspError::Spawn {
            command: command.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, e),
        })?;
        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        platform::configure(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| LspError::Spawn {
            command: command.to_string(),
            source,
        })?;

        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        tracing::debug!(pid = ?child.id(), program = %program.display(), "Language server spawned");
        self.child = Some(child);
        Ok(())
    }

    fn take_reader(&mut self) -> Option<Self::Reader> {
        self.stdout.take()
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "server stdin closed"))?;
        stdin.write_all(bytes).await?;
        stdin.flush().await
    }

    fn is_alive(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    async fn close_handles(&mut self, grace: Duration) {
        // Dropping stdin is the server's cue that no more input is coming.
        self.stdin = None;
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return;
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Language server exited"),
            Ok(Err(e)) => tracing::warn!("Failed waiting for language server: {e}"),
            Err(_) => {
                tracing::debug!("Language server didn't exit in time, killing");
                platform::terminate(&mut child).await;
            }
        }
    }
}
