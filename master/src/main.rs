//! # Cluster tunnel fabric — master node
//!
//! Accepts user HTTP/WebSocket traffic and the `/cluster/tunnel` control
//! connection from each slave, then forwards the subset of traffic the
//! user selects (via `X-Target-Slave`/`?_slave=`) to the matching slave.
//! See [`cluster_tunnel_master`] for the module breakdown.

use clap::Parser;
use cluster_tunnel_master::config::Config;
use cluster_tunnel_master::manager::TunnelManager;
use cluster_tunnel_master::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cluster_tunnel_master=info".into()),
        )
        .init();

    let config = Config::parse();

    let manager = if config.cluster_mode_enabled() {
        let secret = config
            .cluster_secret
            .clone()
            .expect("cluster_mode_enabled implies a secret is configured");
        info!("cluster mode enabled; waiting for slave connections on /cluster/tunnel");
        Some(TunnelManager::new(
            secret,
            config.auth_timeout(),
            config.request_timeout(),
        ))
    } else {
        warn!("no CLUSTER_SECRET configured (or DEPLOYMENT_MODE != master); running standalone");
        None
    };

    let state = Arc::new(AppState {
        manager,
        local_app: cluster_tunnel_master::local_app::router(),
    });
    let app = cluster_tunnel_master::build_router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    info!(%addr, "master listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
