//! # Cluster tunnel fabric — slave node
//!
//! Entry point: parse configuration, set up logging, and run the reconnect
//! loop (C6) until SIGINT/SIGTERM asks it to stop gracefully (SPEC_FULL
//! 10.5) — the control connection and every open local tunnel are closed
//! before the process exits, rather than killed mid-frame.

use clap::Parser;
use cluster_tunnel_slave::client;
use cluster_tunnel_slave::config::Config;
use cluster_tunnel_slave::state::SlaveState;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cluster_tunnel_slave=info".into()),
        )
        .init();

    let config = Config::parse();
    info!(
        slave_id = %config.slave_id,
        master_url = %config.master_url,
        port = config.port,
        "starting slave"
    );

    let state = SlaveState::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    client::run_forever(state, shutdown_rx).await;
    info!("slave stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
