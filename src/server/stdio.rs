//! Line-delimited JSON-RPC over a reader/writer pair (stdin/stdout in production).

use super::protocol::{Notification, Response, RpcError, INVALID_REQUEST};
use super::McpServer;
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Lines longer than this are rejected without being parsed.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Serve until EOF or a `shutdown` request.
///
/// Each line is handled on its own task; replies go through a single
/// writer so lines never interleave.
pub async fn serve<R, W>(server: Arc<McpServer>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let hello = Notification::new("capabilities", server.capabilities());
    let _ = tx.send(serde_json::to_string(&hello)?);

    let shutdown = server.shutdown_token();
    let mut lines = reader.lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown requested");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.len() > MAX_MESSAGE_BYTES => {
                    let reply = Response::failure(
                        Value::Null,
                        RpcError::new(INVALID_REQUEST, format!("message exceeds {} bytes", MAX_MESSAGE_BYTES)),
                    );
                    let _ = tx.send(serde_json::to_string(&reply)?);
                }
                Ok(Some(line)) => {
                    let server = Arc::clone(&server);
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        if let Some(reply) = server.handle_line(&line).await {
                            let _ = tx.send(reply);
                        }
                    });
                }
                Ok(None) => {
                    debug!("input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read input");
                    break;
                }
            },
            // Reap finished calls so the set does not grow unbounded.
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    // Calls still running after EOF finish; after `shutdown` they see the
    // cancelled root token and return early.
    while in_flight.join_next().await.is_some() {}
    shutdown.cancel();

    drop(tx);
    writer_task
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    info!("stdio transport closed");
    Ok(())
}
