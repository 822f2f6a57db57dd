//! Router-level tests for the HTTP routing middleware (C7), exercised the
//! way the other `axum`-based repos in this corpus test handlers: build the
//! real `Router` and drive it with `tower::ServiceExt::oneshot` instead of
//! a bound TCP listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cluster_tunnel_master::manager::TunnelManager;
use cluster_tunnel_master::state::AppState;
use cluster_tunnel_master::{build_router, local_app};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn standalone_state() -> Arc<AppState> {
    Arc::new(AppState {
        manager: None,
        local_app: local_app::router(),
    })
}

fn master_state() -> Arc<AppState> {
    Arc::new(AppState {
        manager: Some(TunnelManager::new(
            "shh".into(),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )),
        local_app: local_app::router(),
    })
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn no_target_slave_header_dispatches_locally() {
    let app = build_router(standalone_state());
    let req = Request::builder().uri("/api/projects").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn target_slave_local_dispatches_locally() {
    let app = build_router(master_state());
    let req = Request::builder()
        .uri("/api/projects")
        .header("x-target-slave", "local")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn target_slave_not_connected_returns_503_structured_body() {
    let app = build_router(master_state());
    let req = Request::builder()
        .uri("/api/projects")
        .header("x-target-slave", "ghost")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "Slave not connected");
    assert_eq!(body["slaveId"], "ghost");
}

#[tokio::test]
async fn target_slave_header_without_master_mode_is_not_master_mode() {
    // Standalone master: no tunnel manager exists to forward through.
    let app = build_router(standalone_state());
    let req = Request::builder()
        .uri("/api/projects")
        .header("x-target-slave", "s1")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "Not in master mode");
}

#[tokio::test]
async fn always_local_prefixes_bypass_a_target_slave_header() {
    // /api/cluster/status is always local even with a (bogus) routing header.
    let app = build_router(master_state());
    let req = Request::builder()
        .uri("/api/cluster/status")
        .header("x-target-slave", "ghost")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["mode"], "master");
}

#[tokio::test]
async fn cluster_status_reports_standalone_mode_without_a_manager() {
    let app = build_router(standalone_state());
    let req = Request::builder()
        .uri("/api/cluster/status")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["mode"], "standalone");
    assert_eq!(body["isMaster"], false);
}

#[tokio::test]
async fn list_slaves_outside_master_mode_is_a_400() {
    let app = build_router(standalone_state());
    let req = Request::builder()
        .uri("/api/cluster/slaves")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_slaves_in_master_mode_always_includes_the_local_synthetic_entry() {
    let app = build_router(master_state());
    let req = Request::builder()
        .uri("/api/cluster/slaves")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let clients = body["clients"].as_array().unwrap();
    assert!(clients.iter().any(|c| c["id"] == "local" && c["isLocal"] == true));
}
