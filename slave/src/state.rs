//! # Slave-side shared state
//!
//! Tracks the local WebSocket tunnels this slave currently has open against
//! its own local service, keyed by tunnel-id — the slave-side half of the
//! data model in §3 (the master-side half lives in `cluster_tunnel_master`'s
//! `tunnels::TunnelMultiplexer`). Backed by the same [`DashMap`] pattern the
//! master uses, for the same reason: the control-connection reader and each
//! local WebSocket's own relay task touch this map concurrently.

use crate::config::Config;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Sends a frame to the local WebSocket's writer task for a single tunnel.
pub type LocalTx = mpsc::UnboundedSender<Message>;

#[derive(Clone)]
pub struct SlaveState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    tunnels: Arc<DashMap<String, LocalTx>>,
}

impl SlaveState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            tunnels: Arc::new(DashMap::new()),
        }
    }

    pub fn register_tunnel(&self, tunnel_id: String, tx: LocalTx) {
        self.tunnels.insert(tunnel_id, tx);
    }

    /// Forwards a master-originated frame to the local WebSocket if the
    /// tunnel is still open; silently dropped otherwise (§4.6 `ws_message`).
    pub fn deliver(&self, tunnel_id: &str, data: String) {
        if let Some(tx) = self.tunnels.get(tunnel_id) {
            let _ = tx.send(Message::Text(data.into()));
        }
    }

    /// Closes and forgets a tunnel, whether the master asked for it
    /// (`ws_tunnel_close`) or the local side hung up on its own.
    pub fn close_tunnel(&self, tunnel_id: &str) {
        if let Some((_, tx)) = self.tunnels.remove(tunnel_id) {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Every open tunnel-id, used to tear everything down when the control
    /// connection to the master is lost (§4.6 step 5).
    pub fn tunnel_ids(&self) -> Vec<String> {
        self.tunnels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn forget(&self, tunnel_id: &str) {
        self.tunnels.remove(tunnel_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_config() -> Config {
        Config::parse_from([
            "slave",
            "--master-url",
            "ws://localhost:7070",
            "--slave-id",
            "s1",
            "--cluster-secret",
            "shh",
        ])
    }

    #[tokio::test]
    async fn deliver_to_a_missing_tunnel_is_a_silent_no_op() {
        let state = SlaveState::new(test_config());
        state.deliver("missing", "data".into());
        assert_eq!(state.len(), 0);
    }

    #[tokio::test]
    async fn close_tunnel_removes_it_and_signals_the_writer() {
        let state = SlaveState::new(test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.register_tunnel("t1".into(), tx);
        state.close_tunnel("t1");
        assert_eq!(state.len(), 0);
        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
    }
}
