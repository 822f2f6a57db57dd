//! # Tunnel client (slave) (C6)
//!
//! Runs the single reconnect loop described in §4.6: dial the master, run
//! the `auth`/`auth_success` handshake, start the 30-second ping timer,
//! dispatch frames until the control connection drops, then back off and
//! try again. The loop never returns on its own — only a shutdown signal
//! (SIGINT/SIGTERM, wired in `main`) ends it.

use crate::backoff;
use crate::http;
use crate::state::SlaveState;
use crate::tunnels;
use cluster_tunnel_protocol::{decode_frame, encode_frame, WireMessage};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Outbound frame sender for the control connection. Shared with
/// [`crate::tunnels`] so a tunnel's reader task can emit `ws_data` without
/// going through the dispatch loop.
pub type FrameTx = mpsc::UnboundedSender<WireMessage>;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

enum Outcome {
    Disconnected,
    Shutdown,
}

/// The transport-level failure that feeds the backoff loop (§4.6 step 1/3,
/// SPEC_FULL 10.4). Both variants are treated identically by the caller —
/// go to backoff — but are distinguished in logs so a stuck master and a
/// master that rejects the handshake don't look the same in the logs.
#[derive(Debug, thiserror::Error)]
enum DialError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed before auth_success")]
    AuthRejected,
}

/// Drives the reconnect loop forever, or until `shutdown` reports `true`.
pub async fn run_forever(state: SlaveState, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return;
        }

        match run_once(&state, &mut attempt, &mut shutdown).await {
            Outcome::Shutdown => return,
            Outcome::Disconnected => {}
        }

        if *shutdown.borrow() {
            return;
        }

        let delay = backoff::next_delay(
            attempt,
            state.config.reconnect_base_delay(),
            state.config.reconnect_max_delay(),
        );
        attempt = attempt.saturating_add(1);
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// One full iteration of §4.6's five steps: dial, auth, ping + dispatch
/// until disconnect, cleanup.
async fn run_once(state: &SlaveState, attempt: &mut u32, shutdown: &mut watch::Receiver<bool>) -> Outcome {
    let url = state.config.control_url();
    let ws_stream = match tokio_tungstenite::connect_async(&url).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let err = DialError::from(e);
            warn!(error = %err, %url, "failed to dial master");
            return Outcome::Disconnected;
        }
    };

    let (sink, mut stream) = ws_stream.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer = tokio::spawn(run_writer(sink, out_rx));

    let auth = WireMessage::Auth {
        slave_id: state.config.slave_id.clone(),
        slave_name: state.config.slave_name(),
        secret: state.config.cluster_secret.clone(),
    };
    if out_tx.send(auth).is_err() {
        drop(out_tx);
        let _ = writer.await;
        return Outcome::Disconnected;
    }

    match await_auth_success(&mut stream, shutdown).await {
        AuthOutcome::Success => {}
        AuthOutcome::Rejected => {
            warn!(error = %DialError::AuthRejected, "authentication did not complete");
            drop(out_tx);
            let _ = writer.await;
            return Outcome::Disconnected;
        }
        AuthOutcome::Shutdown => {
            info!("shutdown requested while awaiting auth_success");
            drop(out_tx);
            let _ = writer.await;
            return Outcome::Shutdown;
        }
    }
    info!(slave_id = %state.config.slave_id, "authenticated with master");
    *attempt = 0;

    let ping_tx = out_tx.clone();
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.tick().await; // first tick fires immediately; skip it, first ping is 30s out
        loop {
            interval.tick().await;
            if ping_tx
                .send(WireMessage::Ping { timestamp: now_millis() })
                .is_err()
            {
                break;
            }
        }
    });

    let graceful = loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(wm) => dispatch(state, &out_tx, wm).await,
                        Err(e) => warn!(error = %e, "dropping malformed frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "master closed the control connection");
                        break false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "control socket error");
                        break false;
                    }
                    None => break false,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested, closing control connection");
                    break true;
                }
            }
        }
    };

    ping_task.abort();
    for tunnel_id in state.tunnel_ids() {
        state.close_tunnel(&tunnel_id);
    }
    drop(out_tx);
    let _ = writer.await;

    if graceful {
        Outcome::Shutdown
    } else {
        Outcome::Disconnected
    }
}

enum AuthOutcome {
    Success,
    Rejected,
    Shutdown,
}

/// Waits for `auth_success` or a close, per §4.6 step 3, while also racing
/// `shutdown` the same way the authenticated dispatch loop does — a
/// SIGINT/SIGTERM delivered mid-handshake must not wait on the master to
/// respond before the slave starts tearing down. Any other frame (malformed
/// or of a different type) is logged and skipped — the slave never rejects
/// the handshake itself, only the master does.
async fn await_auth_success(
    stream: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    shutdown: &mut watch::Receiver<bool>,
) -> AuthOutcome {
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(WireMessage::AuthSuccess { .. }) => return AuthOutcome::Success,
                        Ok(other) => {
                            warn!(?other, "unexpected frame before auth_success");
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame during auth");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "master closed during authentication");
                        return AuthOutcome::Rejected;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "control socket error during authentication");
                        return AuthOutcome::Rejected;
                    }
                    None => return AuthOutcome::Rejected,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return AuthOutcome::Shutdown;
                }
            }
        }
    }
}

async fn dispatch(state: &SlaveState, out_tx: &FrameTx, msg: WireMessage) {
    match msg {
        WireMessage::HttpRequest {
            request_id,
            method,
            path,
            headers,
            body,
        } => {
            let http_client = state.http.clone();
            let port = state.config.port;
            let secret = state.config.cluster_secret.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let response = http::forward(&http_client, port, &secret, request_id, method, path, headers, body).await;
                let _ = out_tx.send(response);
            });
        }
        WireMessage::WsTunnelOpen { tunnel_id, channel, token } => {
            tunnels::open(state.clone(), out_tx.clone(), tunnel_id, channel, token);
        }
        WireMessage::WsMessage { tunnel_id, data } => state.deliver(&tunnel_id, data),
        WireMessage::WsTunnelClose { tunnel_id } => state.close_tunnel(&tunnel_id),
        WireMessage::Pong { .. } => {}
        WireMessage::Unknown => warn!("ignoring unknown frame type"),
        other => warn!(?other, "unexpected frame type from master"),
    }
}

async fn run_writer(
    mut sink: impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    mut out_rx: mpsc::UnboundedReceiver<WireMessage>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Ok(text) = encode_frame(&msg) {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_config() -> crate::config::Config {
        crate::config::Config::parse_from([
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
    async fn dispatch_delivers_ws_message_to_an_open_tunnel() {
        let state = SlaveState::new(test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.register_tunnel("t1".into(), tx);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();

        dispatch(
            &state,
            &out_tx,
            WireMessage::WsMessage { tunnel_id: "t1".into(), data: "hi".into() },
        )
        .await;

        match rx.recv().await.unwrap() {
            Message::Text(t) => assert_eq!(t, "hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_closes_a_tunnel_on_ws_tunnel_close() {
        let state = SlaveState::new(test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.register_tunnel("t1".into(), tx);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();

        dispatch(&state, &out_tx, WireMessage::WsTunnelClose { tunnel_id: "t1".into() }).await;

        assert_eq!(state.len(), 0);
        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn dispatch_ignores_pong_and_unknown() {
        let state = SlaveState::new(test_config());
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        dispatch(&state, &out_tx, WireMessage::Pong { timestamp: 1 }).await;
        dispatch(&state, &out_tx, WireMessage::Unknown).await;
        drop(out_tx);
        assert!(out_rx.recv().await.is_none());
    }
}
