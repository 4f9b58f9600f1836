//! Stdio transport — reads JSON-RPC from stdin, writes to stdout.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::protocol::ProtocolHandler;
use crate::types::{JsonRpcMessage, McpError, McpResult, RequestId};

use super::framing;

/// Stdio transport for desktop MCP clients.
///
/// Requests run concurrently, one task each; responses are written by a
/// single writer task in completion order.
pub struct StdioTransport {
    handler: Arc<ProtocolHandler>,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Run the transport loop over the process's stdin and stdout.
    pub async fn run(&self) -> McpResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        tracing::info!("Stdio transport started");
        self.serve(stdin, stdout).await
    }

    /// Run the transport loop over arbitrary streams until the reader hits EOF.
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(write_responses(rx, writer));
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await.map_err(McpError::Io)?;

            if bytes_read == 0 {
                tracing::info!("EOF on stdin, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match framing::parse_message(trimmed) {
                Ok(JsonRpcMessage::Request(request)) => {
                    self.handler.spawn_request(request, tx.clone()).await;
                }
                Ok(msg) => {
                    if let Some(response) = self.handler.handle_message(msg).await {
                        let _ = tx.send(response);
                    }
                }
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    let error = e.to_json_rpc_error(RequestId::Null);
                    let value = serde_json::to_value(error)
                        .map_err(|e| McpError::InternalError(e.to_string()))?;
                    let _ = tx.send(value);
                }
            }
        }

        // The writer finishes once every in-flight request has dropped its sender.
        drop(tx);
        writer_task
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<Value>, mut writer: W) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let framed = framing::frame_message(&response)?;
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(McpError::Io)?;
        writer.flush().await.map_err(McpError::Io)?;
    }
    Ok(())
}
