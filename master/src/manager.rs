//! # Tunnel manager (C5)
//!
//! Accepts control-connection WebSockets at `/cluster/tunnel`, runs the
//! per-connection authentication state machine, and composes the slave
//! registry (C2), request correlator (C3), and WS tunnel multiplexer (C4)
//! behind the two operations the HTTP layer calls: [`TunnelManager::forward_http_request`]
//! and [`TunnelManager::create_ws_tunnel`].

use crate::correlator::{RequestCorrelator, RequestOutcome};
use crate::registry::SlaveRegistry;
use crate::tunnels::TunnelMultiplexer;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use cluster_tunnel_protocol::{close_code, decode_frame, encode_frame, Channel, WireMessage};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("slave not connected")]
    SlaveNotConnected,
    #[error("request timed out waiting for the slave")]
    Timeout,
    #[error("{0}")]
    SlaveError(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub struct ForwardResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

pub struct TunnelManager {
    pub registry: SlaveRegistry,
    pub correlator: RequestCorrelator,
    pub tunnels: TunnelMultiplexer,
    cluster_secret: String,
    auth_timeout: Duration,
    request_timeout: Duration,
}

impl TunnelManager {
    pub fn new(cluster_secret: String, auth_timeout: Duration, request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: SlaveRegistry::new(),
            correlator: RequestCorrelator::new(),
            tunnels: TunnelMultiplexer::new(),
            cluster_secret,
            auth_timeout,
            request_timeout,
        })
    }

    /// Drives one `/cluster/tunnel` connection end to end: authenticate,
    /// dispatch frames until the socket closes, then clean up every trace
    /// of the slave from the registry, correlator, and tunnel map.
    pub async fn run_control_connection(self: Arc<Self>, socket: WebSocket) {
        let (sink, mut stream) = socket.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (close_tx, close_rx) = mpsc::unbounded_channel::<u16>();
        let writer = tokio::spawn(run_writer(sink, out_rx, close_rx));

        let Some((slave_id, slave_name)) = self.authenticate(&mut stream, &close_tx).await else {
            drop(out_tx);
            let _ = writer.await;
            return;
        };

        self.registry
            .register(&slave_id, slave_name, out_tx.clone(), close_tx.clone());
        let _ = out_tx.send(WireMessage::AuthSuccess {
            slave_id: slave_id.clone(),
        });
        info!(slave_id, "slave authenticated");

        self.run_authenticated(&slave_id, &mut stream, &out_tx).await;

        info!(slave_id, "slave disconnected, cleaning up");
        self.registry.unregister(&slave_id);
        for tunnel_id in self.tunnels.tunnel_ids_for_slave(&slave_id) {
            self.tunnels.close_local(&tunnel_id);
        }
        self.correlator.fail_for_slave(&slave_id, "slave disconnected");

        drop(out_tx);
        let _ = writer.await;
    }

    /// `awaiting-auth` state (§4.5): waits for a valid `auth` frame within
    /// `auth_timeout`, rejecting anything else with the matching close code.
    async fn authenticate(
        &self,
        stream: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
        close_tx: &mpsc::UnboundedSender<u16>,
    ) -> Option<(String, String)> {
        let outcome = tokio::time::timeout(self.auth_timeout, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(WireMessage::Auth {
                            slave_id,
                            slave_name,
                            secret,
                        }) => {
                            if slave_id.is_empty() || secret != self.cluster_secret {
                                return Err(close_code::AUTH_FAILED);
                            }
                            return Ok((slave_id, slave_name));
                        }
                        Ok(_) => return Err(close_code::EXPECTED_AUTH),
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame during auth");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return Err(0),
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => return Err(0),
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(ok)) => Some(ok),
            Ok(Err(0)) => None,
            Ok(Err(code)) => {
                let _ = close_tx.send(code);
                None
            }
            Err(_elapsed) => {
                let _ = close_tx.send(close_code::AUTH_TIMEOUT);
                None
            }
        }
    }

    /// `authenticated` state (§4.5): dispatches every subsequent frame
    /// until the connection closes.
    async fn run_authenticated(
        &self,
        slave_id: &str,
        stream: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
        out_tx: &mpsc::UnboundedSender<WireMessage>,
    ) {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(msg) => self.dispatch(slave_id, msg, out_tx).await,
                    Err(e) => warn!(slave_id, error = %e, "dropping malformed frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(slave_id, error = %e, "control socket error");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, slave_id: &str, msg: WireMessage, out_tx: &mpsc::UnboundedSender<WireMessage>) {
        match msg {
            WireMessage::Response {
                request_id,
                status,
                headers,
                body,
                error,
            } => {
                let outcome = match error {
                    Some(e) => RequestOutcome::Error(e),
                    None => RequestOutcome::Response {
                        status: status.unwrap_or(502),
                        headers: headers.unwrap_or_default(),
                        body,
                    },
                };
                self.correlator.complete(&request_id, outcome);
            }
            WireMessage::WsData { tunnel_id, data } => self.tunnels.deliver(&tunnel_id, data),
            WireMessage::WsTunnelClosed { tunnel_id } => {
                self.tunnels.close_local(&tunnel_id);
            }
            WireMessage::Ping { timestamp } => {
                self.registry.touch(slave_id);
                let _ = out_tx.send(WireMessage::Pong { timestamp });
            }
            WireMessage::Error {
                tunnel_id,
                request_id,
                error,
            } => {
                warn!(slave_id, %error, "slave reported an error");
                if let Some(rid) = request_id {
                    self.correlator.complete(&rid, RequestOutcome::Error(error));
                }
                if let Some(tid) = tunnel_id {
                    self.tunnels.close_local(&tid);
                }
            }
            WireMessage::Unknown => warn!(slave_id, "ignoring unknown frame type"),
            other => warn!(slave_id, ?other, "unexpected frame type from a slave"),
        }
    }

    /// Forwards an HTTP request to `slave_id` and waits for its response
    /// (or a timeout), per §4.5. Hop-by-hop and routing headers have
    /// already been stripped by the caller (§4.7 / C7).
    pub async fn forward_http_request(
        &self,
        slave_id: &str,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<ForwardResponse, ForwardError> {
        let tx = self
            .registry
            .sender(slave_id)
            .ok_or(ForwardError::SlaveNotConnected)?;

        let (request_id, rx) = self.correlator.issue(slave_id.to_string(), self.request_timeout);
        let frame = WireMessage::HttpRequest {
            request_id: request_id.clone(),
            method,
            path,
            headers,
            body,
        };
        if tx.send(frame).is_err() {
            self.correlator
                .complete(&request_id, RequestOutcome::Error("slave disconnected".into()));
            return Err(ForwardError::Transport(
                "control connection closed while sending the request".into(),
            ));
        }

        match rx.await {
            Ok(RequestOutcome::Response { status, headers, body }) => {
                Ok(ForwardResponse { status, headers, body })
            }
            Ok(RequestOutcome::Timeout) => Err(ForwardError::Timeout),
            Ok(RequestOutcome::Error(e)) => Err(ForwardError::SlaveError(e)),
            Err(_recv_dropped) => Err(ForwardError::Transport("internal: correlator channel dropped".into())),
        }
    }

    /// Allocates a tunnel-id, wires the user's WebSocket to relay frames
    /// in both directions, and emits `ws_tunnel_open` on the slave's
    /// control connection (§4.5, §4.4).
    pub fn create_ws_tunnel(
        self: &Arc<Self>,
        slave_id: &str,
        user_socket: WebSocket,
        channel: Channel,
        token: String,
    ) -> Result<(), ForwardError> {
        let tx = self
            .registry
            .sender(slave_id)
            .ok_or(ForwardError::SlaveNotConnected)?;

        let tunnel_id = uuid::Uuid::new_v4().to_string();
        let (user_sink, mut user_stream) = user_socket.split();
        let (user_tx, mut user_rx) = TunnelMultiplexer::make_user_channel();
        self.tunnels
            .open(tunnel_id.clone(), slave_id.to_string(), channel, user_tx);

        let mut user_sink = user_sink;
        tokio::spawn(async move {
            while let Some(msg) = user_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if user_sink.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        if tx
            .send(WireMessage::WsTunnelOpen {
                tunnel_id: tunnel_id.clone(),
                channel,
                token,
            })
            .is_err()
        {
            self.tunnels.close_local(&tunnel_id);
            return Err(ForwardError::SlaveNotConnected);
        }

        let manager = self.clone();
        let tid = tunnel_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = user_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if tx
                            .send(WireMessage::WsMessage {
                                tunnel_id: tid.clone(),
                                data: text.to_string(),
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = tx.send(WireMessage::WsTunnelClose { tunnel_id: tid.clone() });
            manager.tunnels.close_local(&tid);
        });

        Ok(())
    }
}

/// Single writer task owning the control connection's sink. All outbound
/// traffic — protocol frames and forced closes — funnels through here so
/// writes from different call sites never interleave (§5, §9).
async fn run_writer(
    mut sink: impl futures::Sink<Message, Error = axum::Error> + Unpin,
    mut out_rx: mpsc::UnboundedReceiver<WireMessage>,
    mut close_rx: mpsc::UnboundedReceiver<u16>,
) {
    loop {
        tokio::select! {
            maybe_msg = out_rx.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if let Ok(text) = encode_frame(&msg) {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            Some(code) = close_rx.recv() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: close_reason(code).into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

fn close_reason(code: u16) -> &'static str {
    match code {
        close_code::AUTH_TIMEOUT => "authentication timeout",
        close_code::AUTH_FAILED => "authentication failed",
        close_code::EXPECTED_AUTH => "expected auth",
        close_code::REPLACED => "replaced",
        _ => "closed",
    }
}
