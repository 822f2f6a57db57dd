//! # Cluster status API (C8)
//!
//! Read-only endpoints over local HTTP exposing the slave registry's
//! state. Outside master mode every endpoint but `/status` answers
//! `400 {"error": "Not in master mode"}` (§4.8).

use crate::registry::SlaveSnapshot;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlaveView {
    id: String,
    name: String,
    status: &'static str,
}

impl From<SlaveSnapshot> for SlaveView {
    fn from(s: SlaveSnapshot) -> Self {
        Self {
            id: s.id,
            name: s.name,
            status: s.status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    mode: &'static str,
    is_master: bool,
    connected_slaves: usize,
    slaves: Vec<SlaveView>,
}

/// `GET /api/cluster/status` — always available, including standalone mode.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    match &state.manager {
        Some(manager) => {
            let slaves: Vec<SlaveView> = manager.registry.list().into_iter().map(Into::into).collect();
            Json(StatusResponse {
                mode: "master",
                is_master: true,
                connected_slaves: slaves.len(),
                slaves,
            })
        }
        None => Json(StatusResponse {
            mode: "standalone",
            is_master: false,
            connected_slaves: 0,
            slaves: vec![],
        }),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientEntry {
    id: String,
    name: String,
    status: &'static str,
    is_local: bool,
}

impl ClientEntry {
    fn local() -> Self {
        Self {
            id: "local".into(),
            name: "Local Server".into(),
            status: "connected",
            is_local: true,
        }
    }
}

impl From<SlaveSnapshot> for ClientEntry {
    fn from(s: SlaveSnapshot) -> Self {
        Self {
            id: s.id,
            name: s.name,
            status: s.status,
            is_local: false,
        }
    }
}

/// `GET /api/cluster/slaves` — master only.
pub async fn list_slaves(State(state): State<Arc<AppState>>) -> Response {
    let Some(manager) = &state.manager else {
        return not_master_mode();
    };
    let mut clients = vec![ClientEntry::local()];
    clients.extend(manager.registry.list().into_iter().map(ClientEntry::from));
    Json(json!({ "success": true, "clients": clients })).into_response()
}

/// `GET /api/cluster/slaves/:id` — `:id == "local"` returns the synthetic
/// local entry; otherwise 404 if the slave isn't registered.
pub async fn get_slave(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(manager) = &state.manager else {
        return not_master_mode();
    };
    if id == "local" {
        return Json(ClientEntry::local()).into_response();
    }
    match manager.registry.get(&id) {
        Some(s) => Json(ClientEntry::from(s)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "slave not found" }))).into_response(),
    }
}

/// `GET /api/cluster/slaves/:id/health`.
pub async fn slave_health(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(manager) = &state.manager else {
        return not_master_mode();
    };
    if id == "local" {
        return Json(json!({
            "healthy": true,
            "slaveId": "local",
            "name": "Local Server",
            "status": "connected",
            "message": "local server is always healthy",
        }))
        .into_response();
    }
    match manager.registry.get(&id) {
        Some(s) => Json(json!({
            "healthy": true,
            "slaveId": id,
            "name": s.name,
            "status": s.status,
            "lastPing": s.last_ping,
            "message": "ok",
        }))
        .into_response(),
        None => Json(json!({
            "healthy": false,
            "slaveId": id,
            "message": "slave not connected",
        }))
        .into_response(),
    }
}

fn not_master_mode() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "Not in master mode" }))).into_response()
}
