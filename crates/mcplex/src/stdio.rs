//! Line-framed stdio transport.
//!
//! One JSON-RPC message per line: requests are read from the input stream,
//! responses written newline-terminated to the output stream. The framing
//! contract is strict — multi-line JSON is rejected, and a line that fails
//! to parse produces a `-32700` error with a null id without disturbing
//! subsequent lines. End-of-input terminates the transport cleanly.
//!
//! The transport can also spawn an external command and bind to its
//! standard streams, monitoring the child for exit.

use std::{ffi::OsStr, process::Stdio, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    context::RequestContext,
    engine::{EngineReply, RequestEngine},
    error::{Error, Result},
    schema::{ErrorResponse, Message, PARSE_ERROR},
    transport::{ConnectionHandle, Connections, Transport},
};

/// Stable client id for the single stdio peer.
pub const STDIO_CLIENT_ID: &str = "stdio";

/// Newline-framed JSON-RPC transport over a byte-level duplex channel.
#[derive(Clone)]
pub struct StdioTransport {
    engine: Arc<RequestEngine>,
    connections: Connections,
    shutdown: CancellationToken,
}

impl StdioTransport {
    /// Create a transport backed by the given engine.
    pub fn new(engine: Arc<RequestEngine>) -> Self {
        Self {
            engine,
            connections: Connections::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve stdin/stdout until end-of-input or shutdown.
    pub async fn run(&self) -> Result<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Spawn `program` and serve its standard streams, monitoring exit.
    pub async fn run_command<P, I, A>(&self, program: P, args: I) -> Result<()>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let program_name = program.as_ref().to_string_lossy().into_owned();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn {program_name}: {e}")))?;

        let child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin unavailable".to_string()))?;
        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout unavailable".to_string()))?;

        tokio::select! {
            result = self.run_with(child_stdout, child_stdin) => result,
            status = child.wait() => match status {
                Ok(status) => {
                    info!(command = %program_name, %status, "bound command exited");
                    Ok(())
                }
                Err(e) => Err(Error::Transport(format!(
                    "failed to monitor {program_name}: {e}"
                ))),
            },
        }
    }

    /// Serve an arbitrary reader/writer pair until end-of-input or
    /// shutdown.
    pub async fn run_with<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (handle, mut outbound) = ConnectionHandle::channel(STDIO_CLIENT_ID);
        self.connections.insert(handle.clone());

        let mut lines = BufReader::new(reader).lines();
        let mut writer = writer;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("stdio transport shutting down");
                    break;
                }
                _ = handle.closed() => {
                    debug!("stdio connection closed");
                    break;
                }
                outgoing = outbound.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = write_line(&mut writer, &message).await {
                            error!(%e, "stdio write failed");
                            break;
                        }
                    }
                    None => break,
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch_line(line, &handle).await,
                    Ok(None) => {
                        info!("stdio input closed");
                        break;
                    }
                    Err(e) => {
                        error!(%e, "stdio read failed");
                        break;
                    }
                },
            }
        }

        // Flush whatever responses were already queued before teardown.
        while let Ok(message) = outbound.try_recv() {
            if write_line(&mut writer, &message).await.is_err() {
                break;
            }
        }

        self.connections.close(STDIO_CLIENT_ID);
        self.engine.evict_session(STDIO_CLIENT_ID);
        Ok(())
    }

    /// Decode and dispatch one input line.
    async fn dispatch_line(&self, line: String, handle: &ConnectionHandle) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let value = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(%e, "dropping undecodable stdio line");
                let reply = Message::Error(ErrorResponse::new(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
                handle.send(reply).ok();
                return;
            }
        };

        let ctx = RequestContext::builder(handle.clone()).streaming(true).build();
        match self.engine.process_request(value, &ctx).await {
            EngineReply::Message(message) => {
                handle.send(message).ok();
            }
            EngineReply::Streaming | EngineReply::None => {}
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, client_id: &str, message: Message) -> Result<()> {
        self.connections.send(client_id, message)
    }

    async fn broadcast(&self, message: Message) -> Result<()> {
        self.connections.broadcast(&message);
        Ok(())
    }

    async fn close(&self, client_id: &str) -> Result<()> {
        self.connections.close(client_id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.connections.close_all();
        Ok(())
    }
}

/// Write one newline-terminated JSON message.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
