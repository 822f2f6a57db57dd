//! # Local WebSocket tunnels (§4.6 `ws_tunnel_open`/`ws_tunnel_close`)
//!
//! Dials the slave's own local service for each tunnel the master opens,
//! then relays frames in both directions: local → master as `ws_data`,
//! master → local via [`SlaveState::deliver`]. Mirrors the master's
//! `TunnelMultiplexer` in spirit but owns a real outbound connection
//! instead of a user-facing one.

use crate::client::FrameTx;
use crate::state::SlaveState;
use cluster_tunnel_protocol::{Channel, WireMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Dials `ws://localhost:<port><channel.local_path()>?token=<token>` and
/// wires it into both directions of the tunnel. Runs entirely in background
/// tasks; returns as soon as the dial has been kicked off so the frame
/// dispatch loop is never blocked by a slow or hanging local connect.
pub fn open(state: SlaveState, out_tx: FrameTx, tunnel_id: String, channel: Channel, token: String) {
    tokio::spawn(async move {
        let url = format!(
            "ws://localhost:{}{}?token={}",
            state.config.port,
            channel.local_path(),
            urlencode(&token),
        );

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(tunnel_id, error = %e, "failed to dial local tunnel target");
                let _ = out_tx.send(WireMessage::Error {
                    tunnel_id: Some(tunnel_id.clone()),
                    request_id: None,
                    error: format!("failed to connect to local service: {e}"),
                });
                return;
            }
        };
        info!(tunnel_id, %url, "local tunnel connected");

        let (mut local_sink, mut local_stream) = ws_stream.split();
        let (local_tx, mut local_rx) = mpsc::unbounded_channel::<Message>();
        state.register_tunnel(tunnel_id.clone(), local_tx);

        let writer = tokio::spawn(async move {
            while let Some(msg) = local_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if local_sink.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        while let Some(msg) = local_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if out_tx
                        .send(WireMessage::WsData {
                            tunnel_id: tunnel_id.clone(),
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

        writer.abort();
        state.forget(&tunnel_id);
        let _ = out_tx.send(WireMessage::WsTunnelClosed { tunnel_id });
    });
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a b&c"), "a+b%26c");
    }
}
