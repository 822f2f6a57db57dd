//! # HTTP routing middleware (C7)
//!
//! Decides, per request, whether to run the local handler chain or forward
//! to a slave over its control connection. Mounted as the router's
//! fallback so every path not claimed by `/cluster/tunnel`, `/ws`,
//! `/shell`, or `/api/cluster/*` flows through here first.

use crate::manager::ForwardError;
use crate::state::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cluster_tunnel_protocol::{strip_headers, Channel, HOP_BY_HOP_HEADERS, RESPONSE_STRIP_HEADERS};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

const ALWAYS_LOCAL_PREFIXES: &[&str] = &["/api/cluster/", "/api/user/", "/api/auth/"];

fn is_always_local(path: &str) -> bool {
    ALWAYS_LOCAL_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn target_slave(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-target-slave")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// `GET|POST|... <anything not otherwise routed>` — the C7 entry point.
pub async fn route_or_forward(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    if is_always_local(&path) {
        return dispatch_local(&state, req).await;
    }

    match target_slave(req.headers()) {
        None => dispatch_local(&state, req).await,
        Some(slave_id) if slave_id == "local" => dispatch_local(&state, req).await,
        Some(slave_id) => forward_to_slave(&state, &slave_id, req).await,
    }
}

async fn dispatch_local(state: &AppState, req: Request<Body>) -> Response {
    match state.local_app.clone().oneshot(req).await {
        Ok(resp) => resp,
        Err(infallible) => match infallible {},
    }
}

async fn forward_to_slave(state: &AppState, slave_id: &str, req: Request<Body>) -> Response {
    let Some(manager) = &state.manager else {
        return not_master_mode();
    };
    if !manager.registry.is_connected(slave_id) {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Slave not connected",
            slave_id,
            "the requested slave has no active control connection",
        );
    }

    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut headers: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();
    strip_headers(&mut headers, HOP_BY_HOP_HEADERS);

    let body_bytes = match to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            return error_response(StatusCode::BAD_GATEWAY, "Tunnel error", slave_id, &e.to_string());
        }
    };
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body_bytes).into_owned())
    };

    match manager.forward_http_request(slave_id, method, path, headers, body).await {
        Ok(resp) => build_response(resp),
        Err(ForwardError::SlaveNotConnected) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Slave not connected",
            slave_id,
            "slave disconnected while the request was in flight",
        ),
        Err(ForwardError::Timeout) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "Request timeout",
            slave_id,
            "the slave did not respond before the request's deadline",
        ),
        Err(ForwardError::SlaveError(message)) => {
            error_response(StatusCode::BAD_GATEWAY, "Tunnel error", slave_id, &message)
        }
        Err(ForwardError::Transport(message)) => {
            error_response(StatusCode::BAD_GATEWAY, "Tunnel error", slave_id, &message)
        }
    }
}

fn build_response(mut resp: crate::manager::ForwardResponse) -> Response {
    strip_headers(&mut resp.headers, RESPONSE_STRIP_HEADERS);
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = resp.body.unwrap_or_default();

    let is_json = serde_json::from_str::<serde_json::Value>(&body).is_ok();
    let mut builder = Response::builder().status(status);
    for (name, value) in &resp.headers {
        builder = builder.header(name, value);
    }
    if is_json && !resp.headers.contains_key("content-type") {
        builder = builder.header("content-type", "application/json");
    }
    builder.body(Body::from(body)).unwrap_or_else(|_| {
        (StatusCode::BAD_GATEWAY, "malformed response headers from slave").into_response()
    })
}

fn error_response(status: StatusCode, error: &str, slave_id: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "slaveId": slave_id, "message": message })),
    )
        .into_response()
}

fn not_master_mode() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "Not in master mode" }))).into_response()
}

/// `GET /ws` and `GET /shell` — user-facing tunnel channels (§6). Symmetric
/// with the HTTP path: `?_slave=<id>` absent or `local` stays local,
/// otherwise C4's [`create_ws_tunnel`](crate::manager::TunnelManager::create_ws_tunnel) takes over.
pub async fn ws_or_shell(
    channel: Channel,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let slave_id = params.get("_slave").cloned();
    match slave_id.as_deref() {
        None | Some("local") => ws.on_upgrade(crate::local_app::handle_local_echo),
        Some(slave_id) => {
            let Some(manager) = state.manager.clone() else {
                return not_master_mode();
            };
            if !manager.registry.is_connected(slave_id) {
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Slave not connected",
                    slave_id,
                    "the requested slave has no active control connection",
                );
            }
            let token = params.get("token").cloned().unwrap_or_default();
            let slave_id = slave_id.to_string();
            ws.on_upgrade(move |socket| async move {
                if let Err(e) = manager.create_ws_tunnel(&slave_id, socket, channel, token) {
                    tracing::warn!(slave_id, error = %e, "failed to open ws tunnel");
                }
            })
        }
    }
}

/// `GET /cluster/tunnel` — the slave control-connection entry point (C5).
/// A 404 in standalone mode: there's no tunnel manager to authenticate
/// against.
pub async fn control_socket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(manager) = state.manager.clone() else {
        return (StatusCode::NOT_FOUND, "cluster mode is not enabled").into_response();
    };
    ws.on_upgrade(move |socket| async move {
        manager.run_control_connection(socket).await;
    })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    state: State<Arc<AppState>>,
    query: Query<HashMap<String, String>>,
) -> Response {
    ws_or_shell(Channel::Ws, ws, state, query).await
}

pub async fn shell_handler(
    ws: WebSocketUpgrade,
    state: State<Arc<AppState>>,
    query: Query<HashMap<String, String>>,
) -> Response {
    ws_or_shell(Channel::Shell, ws, state, query).await
}
