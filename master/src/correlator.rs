//! # Request correlator (C3)
//!
//! Issues request-ids for forwarded HTTP requests and resolves the waiting
//! future exactly once, either from a `response` frame or from the
//! request's own deadline timer. Mirrors the "channel + timer task"
//! approach the design notes (§9) call out for languages without
//! first-class cancellable futures — here we have them, but a detached
//! timer task is still the simplest way to race a timeout against an
//! arbitrary completion source without holding a lock across the wait.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The result delivered to whoever is waiting on a forwarded request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Response {
        status: u16,
        headers: HashMap<String, String>,
        body: Option<String>,
    },
    /// The slave reported an `error` frame (or a `response` frame's own
    /// `error` field was set) — distinct from a deadline firing with no
    /// response at all, so callers can tell the two apart (`ForwardError`).
    Error(String),
    /// The request's own deadline timer fired before any `response` frame
    /// arrived.
    Timeout,
}

struct Pending {
    slave_id: String,
    tx: oneshot::Sender<RequestOutcome>,
    timer: JoinHandle<()>,
}

#[derive(Clone)]
pub struct RequestCorrelator {
    pending: Arc<DashMap<String, Pending>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Creates a pending entry addressed to `slave_id` and starts its
    /// deadline timer. Returns the freshly minted request-id and a receiver
    /// that resolves exactly once, with either a `response` frame's outcome
    /// or a "request timeout" error.
    pub fn issue(
        &self,
        slave_id: String,
        timeout: Duration,
    ) -> (String, oneshot::Receiver<RequestOutcome>) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let pending = self.pending.clone();
        let timer_key = request_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, entry)) = pending.remove(&timer_key) {
                let _ = entry.tx.send(RequestOutcome::Timeout);
            }
        });

        self.pending.insert(
            request_id.clone(),
            Pending {
                slave_id,
                tx,
                timer,
            },
        );
        (request_id, rx)
    }

    /// Resolves a pending request. A `response` frame whose request-id has
    /// no pending entry (already completed, already timed out, or never
    /// issued) is silently discarded — this is the "no-op on a second
    /// completion" invariant from §3/§8.
    pub fn complete(&self, request_id: &str, outcome: RequestOutcome) {
        if let Some((_, entry)) = self.pending.remove(request_id) {
            entry.timer.abort();
            let _ = entry.tx.send(outcome);
        }
    }

    /// Fails every request still pending against `slave_id`, used when that
    /// slave's control connection is lost (§4.5, §8 invariant 4).
    pub fn fail_for_slave(&self, slave_id: &str, message: &str) {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.slave_id == slave_id)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.complete(&id, RequestOutcome::Error(message.to_string()));
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_the_waiter_exactly_once() {
        let c = RequestCorrelator::new();
        let (id, rx) = c.issue("s1".into(), Duration::from_secs(5));
        c.complete(
            &id,
            RequestOutcome::Response {
                status: 200,
                headers: HashMap::new(),
                body: Some("ok".into()),
            },
        );
        // Second completion for the same id is a no-op: the entry is gone.
        c.complete(&id, RequestOutcome::Error("too late".into()));
        assert_eq!(c.pending_count(), 0);

        match rx.await.unwrap() {
            RequestOutcome::Response { status, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(body.as_deref(), Some("ok"));
            }
            other => panic!("expected the first completion to win, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_fires_and_removes_the_entry() {
        let c = RequestCorrelator::new();
        let (_id, rx) = c.issue("s1".into(), Duration::from_millis(20));
        match rx.await.unwrap() {
            RequestOutcome::Timeout => {}
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_for_slave_only_touches_that_slaves_requests() {
        let c = RequestCorrelator::new();
        let (id_a, rx_a) = c.issue("a".into(), Duration::from_secs(5));
        let (_id_b, rx_b) = c.issue("b".into(), Duration::from_secs(5));
        c.fail_for_slave("a", "slave disconnected");

        match rx_a.await.unwrap() {
            RequestOutcome::Error(msg) => assert_eq!(msg, "slave disconnected"),
            _ => panic!("expected slave a's request to fail"),
        }
        assert_eq!(c.pending_count(), 1);
        assert!(!id_a.is_empty());
        drop(rx_b); // slave b's request is still pending; just drop the waiter
    }
}
