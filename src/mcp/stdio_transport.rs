use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::errors::{PilotError, PilotResult};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::transport::McpTransport;

struct LineIo {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    /// Bytes of a line not yet terminated. Kept across calls so a send
    /// dropped mid-read loses nothing.
    pending: Vec<u8>,
}

/// One JSON message per line over any byte stream pair. Requests are
/// serialized; a response whose id does not match is discarded, which
/// drains replies to calls abandoned after a timeout. Lines that are not
/// responses at all are skipped too.
pub struct LineTransport {
    io: Mutex<LineIo>,
}

impl LineTransport {
    pub fn new(
        reader: impl AsyncRead + Unpin + Send + 'static,
        writer: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            io: Mutex::new(LineIo {
                reader: Box::new(BufReader::new(reader)),
                writer: Box::new(writer),
                pending: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl McpTransport for LineTransport {
    async fn send(&self, request: JsonRpcRequest) -> PilotResult<JsonRpcResponse> {
        let mut io = self.io.lock().await;
        let mut frame = serde_json::to_string(&request)?;
        frame.push('\n');
        io.writer.write_all(frame.as_bytes()).await?;
        io.writer.flush().await?;

        let LineIo { reader, pending, .. } = &mut *io;
        loop {
            // read_until keeps partial input in `pending` if this future is dropped.
            if reader.read_until(b'\n', pending).await? == 0 {
                return Err(PilotError::Mcp("service closed the connection".into()));
            }
            if pending.last() != Some(&b'\n') {
                continue;
            }
            let line = std::mem::take(pending);
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let response: JsonRpcResponse = match serde_json::from_str(text) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable line from service");
                    continue;
                }
            };
            if response.id == request.id {
                return Ok(response);
            }
            tracing::debug!(expected = %request.id, got = %response.id, "discarding stale response");
        }
    }
}

/// A tool service running as a child process, spoken to over its stdio.
pub struct StdioTransport {
    pub command: String,
    lines: LineTransport,
    _child: std::sync::Mutex<Child>,
}

impl StdioTransport {
    /// Spawn `argv`; the child is killed when the transport is dropped.
    pub fn spawn(argv: &[String]) -> PilotResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PilotError::Config("service command is empty".into()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PilotError::Mcp(format!("failed to start `{program}`: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PilotError::Mcp(format!("`{program}` has no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PilotError::Mcp(format!("`{program}` has no stdout pipe")))?;
        tracing::info!(command = %argv.join(" "), pid = ?child.id(), "tool service started");
        Ok(Self {
            command: argv.join(" "),
            lines: LineTransport::new(stdout, stdin),
            _child: std::sync::Mutex::new(child),
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> PilotResult<JsonRpcResponse> {
        self.lines.send(request).await
    }
}
