//! # Placeholder local application
//!
//! `spec.md` §1 treats "the application served by master and slaves" as an
//! external collaborator entirely out of scope — the tunnel forwards
//! opaque bytes to it, never inspecting or implementing it. This module is
//! just enough of a stand-in for that application to give the routing
//! middleware (C7) and the WS upgrade handlers something real to dispatch
//! to when a request is *not* forwarded, so the fabric is exercisable on
//! its own. It carries no tunnel protocol logic.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;

pub fn router() -> Router {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/ws", get(echo_ws))
        .route("/shell", get(echo_ws))
}

async fn list_projects() -> Json<serde_json::Value> {
    Json(json!({ "projects": [] }))
}

/// A trivial echo endpoint standing in for whatever the local application
/// actually does with its own `/ws`/`/shell` upgrade.
async fn echo_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_echo)
}

/// Exposed so the always-local branch of the `/ws`/`/shell` upgrade
/// handlers (C7) can hand a locally-routed socket straight to this stand-in
/// without round-tripping through the `local_app` router.
pub async fn handle_local_echo(socket: WebSocket) {
    handle_echo(socket).await
}

async fn handle_echo(socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
