//! # Slave registry (C2)
//!
//! Maps slave-id to connection state. Backed by [`DashMap`] for the same
//! reason the teacher's `AppState` uses it: multiple WebSocket handler
//! tasks (the accept loop, the HTTP forwarding path, the WS tunnel path)
//! touch the registry concurrently and none of them should block while
//! holding a lock across network I/O.

use cluster_tunnel_protocol::{close_code, WireMessage};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::info;

/// Outbound frame sender for a slave's control connection. The connection
/// task is the only reader of the paired channel, enforcing single-writer
/// discipline per connection (§5).
pub type FrameTx = mpsc::UnboundedSender<WireMessage>;

/// Forces the owning connection task to close with the given code. Reused
/// both for eviction (`register` replacing an existing entry) and for
/// auth-phase rejections, since both are "close this connection now".
pub type CloseTx = mpsc::UnboundedSender<u16>;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct SlaveRecord {
    name: String,
    connected_at: i64,
    last_ping: AtomicI64,
    tx: FrameTx,
    close: CloseTx,
}

/// Read-only view of a slave record, safe to hand out across an `.await`.
#[derive(Debug, Clone, Serialize)]
pub struct SlaveSnapshot {
    pub id: String,
    pub name: String,
    pub status: &'static str,
    pub connected_at: i64,
    pub last_ping: i64,
}

impl SlaveSnapshot {
    fn from_record(id: &str, rec: &SlaveRecord) -> Self {
        Self {
            id: id.to_string(),
            name: rec.name.clone(),
            status: "connected",
            connected_at: rec.connected_at,
            last_ping: rec.last_ping.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct SlaveRegistry {
    slaves: Arc<DashMap<String, SlaveRecord>>,
}

impl SlaveRegistry {
    pub fn new() -> Self {
        Self {
            slaves: Arc::new(DashMap::new()),
        }
    }

    /// Installs a new record for `slave_id`, evicting (close code 4004) any
    /// connection already registered under that id first. The eviction
    /// signal is sent before the new record is installed, so the old
    /// connection is never left believing it still owns the slot.
    pub fn register(&self, slave_id: &str, name: String, tx: FrameTx, close: CloseTx) {
        if let Some((_, prev)) = self.slaves.remove(slave_id) {
            info!(slave_id, "evicting previous control connection");
            let _ = prev.close.send(close_code::REPLACED);
        }
        self.slaves.insert(
            slave_id.to_string(),
            SlaveRecord {
                name,
                connected_at: now_millis(),
                last_ping: AtomicI64::new(now_millis()),
                tx,
                close,
            },
        );
    }

    pub fn unregister(&self, slave_id: &str) {
        self.slaves.remove(slave_id);
    }

    /// Updates the last-ping timestamp. A no-op if the slave is no longer
    /// registered (e.g. a ping racing a disconnect).
    pub fn touch(&self, slave_id: &str) {
        if let Some(rec) = self.slaves.get(slave_id) {
            rec.last_ping.store(now_millis(), Ordering::Relaxed);
        }
    }

    pub fn is_connected(&self, slave_id: &str) -> bool {
        self.slaves.contains_key(slave_id)
    }

    pub fn sender(&self, slave_id: &str) -> Option<FrameTx> {
        self.slaves.get(slave_id).map(|r| r.tx.clone())
    }

    pub fn get(&self, slave_id: &str) -> Option<SlaveSnapshot> {
        self.slaves
            .get(slave_id)
            .map(|r| SlaveSnapshot::from_record(slave_id, &r))
    }

    /// An immutable snapshot of every connected slave (§4.2).
    pub fn list(&self) -> Vec<SlaveSnapshot> {
        self.slaves
            .iter()
            .map(|e| SlaveSnapshot::from_record(e.key(), &e))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }
}

impl Default for SlaveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_channels() -> (FrameTx, CloseTx) {
        (mpsc::unbounded_channel().0, mpsc::unbounded_channel().0)
    }

    #[test]
    fn register_then_get_round_trips() {
        let reg = SlaveRegistry::new();
        let (tx, close) = dummy_channels();
        reg.register("s1", "Slave One".into(), tx, close);
        let snap = reg.get("s1").unwrap();
        assert_eq!(snap.id, "s1");
        assert_eq!(snap.status, "connected");
        assert!(reg.is_connected("s1"));
    }

    #[test]
    fn second_register_evicts_first_with_code_4004() {
        let reg = SlaveRegistry::new();
        let (frame_tx1, _frame_rx1) = mpsc::unbounded_channel();
        let (close_tx1, mut close_rx1) = mpsc::unbounded_channel::<u16>();
        reg.register("s1", "First".into(), frame_tx1, close_tx1);

        let (frame_tx2, _frame_rx2) = mpsc::unbounded_channel();
        let (close_tx2, _close_rx2) = mpsc::unbounded_channel::<u16>();
        reg.register("s1", "Second".into(), frame_tx2, close_tx2);

        assert_eq!(reg.get("s1").unwrap().name, "Second");
        assert_eq!(reg.len(), 1);
        assert_eq!(close_rx1.try_recv().unwrap(), close_code::REPLACED);
    }

    #[test]
    fn unregister_removes_the_slave() {
        let reg = SlaveRegistry::new();
        let (tx, close) = dummy_channels();
        reg.register("s1", "Slave One".into(), tx, close);
        reg.unregister("s1");
        assert!(!reg.is_connected("s1"));
        assert_eq!(reg.list().len(), 0);
    }
}
