//! Server-sent events transport on `/mcp`.
//!
//! `GET /mcp` opens the event stream: an `initialize` event carrying the
//! capabilities document, then a `message` event for every response.
//! `POST /mcp` takes one JSON-RPC message and answers it in the body.

use super::McpServer;
use crate::error::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
struct SseState {
    server: Arc<McpServer>,
    events: broadcast::Sender<String>,
}

pub fn router(server: Arc<McpServer>) -> Router {
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    Router::new()
        .route("/mcp", get(open_stream).post(post_message))
        .with_state(SseState { server, events })
}

/// Listen on localhost until the server's shutdown token is cancelled.
pub async fn serve(server: Arc<McpServer>, port: u16) -> Result<()> {
    let shutdown = server.shutdown_token();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "SSE transport listening on /mcp");

    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("SSE transport closed");
    Ok(())
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    debug!("SSE client connected");
    let initialize = Event::default()
        .event("initialize")
        .data(state.server.capabilities().to_string());

    let messages = BroadcastStream::new(state.events.subscribe()).filter_map(|message| async move {
        // Lagging subscribers skip what they missed.
        message
            .ok()
            .map(|text| Ok(Event::default().event("message").data(text)))
    });

    let shutdown = state.server.shutdown_token();
    let events = stream::once(async move { Ok(initialize) })
        .chain(messages)
        .take_until(async move { shutdown.cancelled().await });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn post_message(State(state): State<SseState>, body: String) -> Response {
    match state.server.handle_line(&body).await {
        Some(reply) => {
            let _ = state.events.send(reply.clone());
            ([(header::CONTENT_TYPE, "application/json")], reply).into_response()
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exec::Executor;
    use crate::server::Services;
    use crate::sync::SyncEngine;
    use crate::vm::ssh::RemoteShell;
    use crate::vm::VmManager;
    use tokio_util::sync::CancellationToken;

    fn state(base: &std::path::Path) -> SseState {
        let vms = Arc::new(VmManager::new(&Settings::new(base)).unwrap());
        let sync = SyncEngine::new(vms.clone());
        let executor = Arc::new(Executor::new(vms.clone(), sync.clone(), RemoteShell::new("ssh")));
        let services = Arc::new(Services { vms, sync, executor });
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        SseState {
            server: Arc::new(McpServer::new(services, CancellationToken::new()).unwrap()),
            events,
        }
    }

    #[tokio::test]
    async fn test_post_returns_and_broadcasts_reply() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let mut subscriber = state.events.subscribe();

        let body = r#"{"jsonrpc":"2.0","id":1,"method":"nope"}"#.to_string();
        let response = post_message(State(state), body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["error"]["code"], -32601);

        let broadcast: serde_json::Value = serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
        assert_eq!(broadcast, reply);
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"jsonrpc":"2.0","method":"nope"}"#.to_string();
        let response = post_message(State(state(dir.path())), body).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
