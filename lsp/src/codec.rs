//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`FrameBuffer`] does the byte-level work: callers push whatever chunk
//! sizes the pipe hands them and pull complete frames back out.
//! [`FrameReader`] drives a buffer from an async reader.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Longest header block accepted before a terminator must have appeared.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH_PREFIX: &str = "Content-Length: ";
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Serialize `msg` and prepend its `Content-Length` header.
pub fn encode_frame(msg: &serde_json::Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
    let mut frame = format!("{CONTENT_LENGTH_PREFIX}{}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Raw payload sliced out of the stream. Not yet known to be valid JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(pub Vec<u8>);

impl RawFrame {
    pub fn parse(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.0).context("parsing JSON-RPC frame")
    }
}

/// Accumulates bytes and slices complete frames off the front.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a header terminator.
    scanned: usize,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed as a frame.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Slice the next complete frame, if one has fully arrived.
    ///
    /// A header block without a usable `Content-Length` is discarded and the
    /// scan continues after it. Errors are reserved for frames the reader
    /// cannot recover from (an oversized length).
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            let Some(header_end) = self.find_header_end() else {
                if self.buf.len() > MAX_HEADER_BYTES {
                    bail!(
                        "{} bytes without an LSP header terminator",
                        self.buf.len()
                    );
                }
                return Ok(None);
            };

            let Some(content_length) = parse_content_length(&self.buf[..header_end]) else {
                tracing::warn!(
                    header = %String::from_utf8_lossy(&self.buf[..header_end]),
                    "Dropping LSP header block without Content-Length"
                );
                self.consume(header_end + HEADER_TERMINATOR.len());
                continue;
            };

            if content_length > MAX_FRAME_BYTES {
                bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
            }

            let body_start = header_end + HEADER_TERMINATOR.len();
            let frame_end = body_start + content_length;
            if self.buf.len() < frame_end {
                return Ok(None);
            }

            let body = self.buf[body_start..frame_end].to_vec();
            self.consume(frame_end);
            return Ok(Some(RawFrame(body)));
        }
    }

    /// Resume the terminator search where the last one gave up, backing off
    /// enough to catch a terminator split across pushes.
    fn find_header_end(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);
        match find(&self.buf[start..], HEADER_TERMINATOR) {
            Some(pos) => {
                self.scanned = start + pos;
                Some(start + pos)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    fn consume(&mut self, len: usize) {
        self.buf.drain(..len);
        self.scanned = 0;
    }

    /// Every complete frame currently buffered, parsed as JSON.
    ///
    /// Payloads that are not valid JSON are logged and skipped.
    pub fn drain_messages(&mut self) -> Result<Vec<serde_json::Value>> {
        let mut out = Vec::new();
        while let Some(raw) = self.next_frame()? {
            match raw.parse() {
                Ok(value) => out.push(value),
                Err(e) => tracing::warn!("Skipping malformed LSP payload: {e:#}"),
            }
        }
        Ok(out)
    }
}

/// Header lines are matched with a case-sensitive `Content-Length: ` prefix.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header
        .split("\r\n")
        .find_map(|line| line.strip_prefix(CONTENT_LENGTH_PREFIX))
        .and_then(|value| value.trim().parse().ok())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads JSON-RPC messages from an async reader.
pub struct FrameReader<R> {
    reader: R,
    buffer: FrameBuffer,
    ready: std::collections::VecDeque<serde_json::Value>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::new(),
            ready: std::collections::VecDeque::new(),
        }
    }

    /// Read the next well-formed message.
    ///
    /// Returns `Ok(None)` on EOF. Malformed payloads are skipped, not returned.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if let Some(msg) = self.ready.pop_front() {
                return Ok(Some(msg));
            }

            let n = self
                .reader
                .read(&mut chunk)
                .await
                .context("reading from language server")?;
            if n == 0 {
                if self.buffer.pending_len() > 0 {
                    tracing::debug!(
                        bytes = self.buffer.pending_len(),
                        "Discarding partial LSP frame at EOF"
                    );
                }
                return Ok(None);
            }

            self.buffer.push(&chunk[..n]);
            self.ready.extend(self.buffer.drain_messages()?);
        }
    }
}
