//! Line-delimited JSON-RPC transport over stdin/stdout.
//!
//! Logging goes to stderr; stdout carries protocol frames only. The loop
//! ends at EOF or when the shutdown signal flips.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::ToolServer;

const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

pub struct StdioTransport {
    shutdown: watch::Receiver<bool>,
}

impl StdioTransport {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown }
    }

    /// Serve requests until stdin closes or shutdown is signalled.
    pub async fn run(mut self, mut server: ToolServer) -> std::io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("stdio transport shutting down");
                        return Ok(());
                    }
                    continue;
                }
            };
            let Some(line) = line else {
                debug!("stdin closed, stopping stdio transport");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "unparseable request line");
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    write_response(&mut stdout, &response).await?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                write_response(&mut stdout, &response).await?;
            }
        }
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> std::io::Result<()> {
    let frame = match serde_json::to_string(response) {
        Ok(frame) => frame,
        Err(err) => {
            // Keep the client from hanging on a broken frame.
            error!(error = %err, "failed to serialize response");
            FALLBACK_ERROR.to_string()
        }
    };
    stdout.write_all(frame.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
