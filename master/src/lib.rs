//! # Cluster tunnel fabric — master node
//!
//! ## Architecture
//!
//! ```text
//! User ──HTTP/WS──► Master ──control WS──► Slave ──HTTP/WS──► Local service
//! ```
//!
//! ## Modules
//!
//! - [`config`]     — environment/CLI configuration (§6)
//! - [`registry`]    — slave registry (C2)
//! - [`correlator`]  — request correlator (C3)
//! - [`tunnels`]     — WS tunnel multiplexer (C4)
//! - [`manager`]     — tunnel manager: auth handshake, forwarding (C5)
//! - [`routing`]     — HTTP routing middleware (C7)
//! - [`api`]         — cluster status API (C8)
//! - [`state`]       — shared axum state
//! - [`local_app`]   — placeholder stand-in for the out-of-scope local app

pub mod api;
pub mod config;
pub mod correlator;
pub mod local_app;
pub mod manager;
pub mod registry;
pub mod routing;
pub mod state;
pub mod tunnels;

use axum::routing::get;
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Builds the full axum [`Router`] for the given state. Split out of
/// `main` so tests can exercise routing decisions with
/// `tower::ServiceExt::oneshot` without binding a real listener.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/cluster/status", get(api::status))
        .route("/api/cluster/slaves", get(api::list_slaves))
        .route("/api/cluster/slaves/{id}", get(api::get_slave))
        .route("/api/cluster/slaves/{id}/health", get(api::slave_health))
        .route("/cluster/tunnel", get(routing::control_socket_handler))
        .route("/ws", get(routing::ws_handler))
        .route("/shell", get(routing::shell_handler))
        .fallback(routing::route_or_forward)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
