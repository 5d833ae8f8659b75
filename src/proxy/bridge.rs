//! stdio side of the proxy
//!
//! Reads newline-delimited JSON-RPC messages from the local MCP client,
//! forwards each one to the backend on its own task, and writes every
//! message coming back as a single line. A single writer task owns the
//! output so lines never interleave.
//!
//! When forwarding a request fails, the client receives a JSON-RPC error
//! response for that request id instead of waiting forever. End of input
//! ends the bridge once in-flight requests have finished.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::error::{ProxyError, Result};
use crate::proxy::backend::HttpBackend;

/// JSON-RPC "Internal error".
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC "Parse error".
pub const PARSE_ERROR: i64 = -32700;

/// Runs the bridge until `input` reaches end of file.
///
/// `outbound_tx`/`outbound_rx` is the channel the backend pushes received
/// messages into; the bridge also uses it for error responses.
///
/// # Errors
///
/// Returns [`ProxyError::Io`] if reading the input fails.
pub async fn run<R, W>(
    backend: Arc<HttpBackend>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    input: R,
    output: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let writer = tokio::spawn(write_lines(outbound_rx, output, stop_rx));

    let read_result = forward_input(&backend, &outbound_tx, input).await;

    backend.close().await;
    let _ = stop_tx.send(());
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "Output writer task failed");
    }

    read_result
}

async fn forward_input<R>(
    backend: &Arc<HttpBackend>,
    outbound: &mpsc::UnboundedSender<String>,
    input: R,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(ProxyError::Io(e).into()),
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        let request_id = match serde_json::from_str::<Value>(message) {
            Ok(value) => request_id(&value),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed message from client");
                let _ = outbound.send(error_response(Value::Null, PARSE_ERROR, "Parse error"));
                continue;
            }
        };

        let backend = Arc::clone(backend);
        let outbound = outbound.clone();
        let message = message.to_string();
        in_flight.spawn(async move {
            if let Err(e) = backend.send(message).await {
                tracing::error!(error = %e, "Forwarding message to backend failed");
                if let Some(id) = request_id {
                    let _ = outbound.send(error_response(id, INTERNAL_ERROR, &e.to_string()));
                }
            }
        });

        while let Some(done) = in_flight.try_join_next() {
            log_join(done);
        }
    };

    tracing::debug!("Client input closed; waiting for in-flight requests");
    while let Some(done) = in_flight.join_next().await {
        log_join(done);
    }
    result
}

fn log_join(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        tracing::warn!(error = %e, "Forwarding task ended abnormally");
    }
}

async fn write_lines<W>(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut output: W,
    mut stop: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            message = rx.recv() => message,
            _ = &mut stop => {
                rx.close();
                break;
            }
        };
        let Some(message) = message else {
            return;
        };
        if write_line(&mut output, &message).await.is_err() {
            return;
        }
    }

    // Drain what was queued before the stop signal.
    while let Some(message) = rx.recv().await {
        if write_line(&mut output, &message).await.is_err() {
            return;
        }
    }
}

async fn write_line<W>(output: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        output.write_all(message.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await
    }
    .await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Failed to write message to client");
    }
    result
}

/// The id of a JSON-RPC request, or `None` for notifications and
/// responses.
pub fn request_id(message: &Value) -> Option<Value> {
    let object = message.as_object()?;
    if !object.contains_key("method") {
        return None;
    }
    object.get("id").filter(|id| !id.is_null()).cloned()
}

/// Builds a JSON-RPC error response.
pub fn error_response(id: Value, code: i64, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
    .to_string()
}
