//! # WebSocket tunnel multiplexer (C4)
//!
//! Maps a tunnel-id to the user-facing WebSocket it was opened for. The
//! user WebSocket itself is owned by the HTTP server layer (the task that
//! accepted the upgrade); this module only holds a channel into that
//! task's writer loop, which is the "weak relation, released on close"
//! ownership §3 describes.

use axum::extract::ws::Message;
use cluster_tunnel_protocol::Channel;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bound on the user-side writer queue. Past this, the tunnel is closed
/// rather than left to queue unboundedly (§4.4, §5 back-pressure rule).
const TUNNEL_WRITE_BUFFER: usize = 64;

pub type UserTx = mpsc::Sender<Message>;

struct TunnelRecord {
    slave_id: String,
    #[allow(dead_code)] // retained for parity with the data model in §3; not yet branched on
    channel: Channel,
    user_tx: UserTx,
}

#[derive(Clone)]
pub struct TunnelMultiplexer {
    tunnels: Arc<DashMap<String, TunnelRecord>>,
}

impl TunnelMultiplexer {
    pub fn new() -> Self {
        Self {
            tunnels: Arc::new(DashMap::new()),
        }
    }

    /// The write-side channel a caller should drain into the user's
    /// WebSocket sink, sized per the back-pressure bound.
    pub fn make_user_channel() -> (UserTx, mpsc::Receiver<Message>) {
        mpsc::channel(TUNNEL_WRITE_BUFFER)
    }

    pub fn open(&self, tunnel_id: String, slave_id: String, channel: Channel, user_tx: UserTx) {
        self.tunnels.insert(
            tunnel_id,
            TunnelRecord {
                slave_id,
                channel,
                user_tx,
            },
        );
    }

    /// Writes a slave-originated frame to the user WebSocket. If the
    /// writer's buffer is full (a slow or stalled user connection) the
    /// frame is dropped and the tunnel is torn down immediately — no
    /// unbounded queuing, per §4.4.
    pub fn deliver(&self, tunnel_id: &str, data: String) {
        let should_close = match self.tunnels.get(tunnel_id) {
            Some(rec) => rec.user_tx.try_send(Message::Text(data.into())).is_err(),
            None => false,
        };
        if should_close {
            self.close_local(tunnel_id);
        }
    }

    /// Closes the user WebSocket and removes the record. Returns the
    /// owning slave-id so the caller can notify it, if that hasn't already
    /// happened.
    pub fn close_local(&self, tunnel_id: &str) -> Option<String> {
        self.tunnels.remove(tunnel_id).map(|(_, rec)| {
            let _ = rec.user_tx.try_send(Message::Close(None));
            rec.slave_id
        })
    }

    pub fn slave_id_of(&self, tunnel_id: &str) -> Option<String> {
        self.tunnels.get(tunnel_id).map(|r| r.slave_id.clone())
    }

    /// Every tunnel currently owned by `slave_id`. Used when that slave's
    /// control connection drops, to close and remove all of its tunnels in
    /// one step (§3 invariant).
    pub fn tunnel_ids_for_slave(&self, slave_id: &str) -> Vec<String> {
        self.tunnels
            .iter()
            .filter(|e| e.slave_id == slave_id)
            .map(|e| e.key().clone())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }
}

impl Default for TunnelMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_writes_to_the_user_channel() {
        let mux = TunnelMultiplexer::new();
        let (user_tx, mut user_rx) = TunnelMultiplexer::make_user_channel();
        mux.open("t1".into(), "s1".into(), Channel::Ws, user_tx);

        mux.deliver("t1", "{\"a\":1}".into());
        match user_rx.recv().await.unwrap() {
            Message::Text(t) => assert_eq!(t, "{\"a\":1}"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_owning_slaves_tunnels_removes_all_of_them() {
        let mux = TunnelMultiplexer::new();
        let (tx1, _rx1) = TunnelMultiplexer::make_user_channel();
        let (tx2, _rx2) = TunnelMultiplexer::make_user_channel();
        mux.open("t1".into(), "s1".into(), Channel::Ws, tx1);
        mux.open("t2".into(), "s1".into(), Channel::Shell, tx2);
        mux.open(
            "t3".into(),
            "s2".into(),
            Channel::Ws,
            TunnelMultiplexer::make_user_channel().0,
        );

        let owned = mux.tunnel_ids_for_slave("s1");
        assert_eq!(owned.len(), 2);
        for tid in owned {
            mux.close_local(&tid);
        }
        assert_eq!(mux.len(), 1);
        assert_eq!(mux.slave_id_of("t3").as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn full_buffer_drops_the_frame_and_closes_the_tunnel() {
        let mux = TunnelMultiplexer::new();
        let (user_tx, _user_rx) = mpsc::channel::<Message>(1);
        mux.open("t1".into(), "s1".into(), Channel::Ws, user_tx);
        // Fill the single slot so the next try_send observes a full buffer.
        mux.deliver("t1", "first".into());
        mux.deliver("t1", "second".into());
        assert_eq!(mux.len(), 0);
    }
}
