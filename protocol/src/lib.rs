//! # Wire protocol
//!
//! The JSON message schema carried over the single persistent WebSocket
//! between a master and one of its slaves (the "control connection"). Every
//! message is a JSON object tagged by a `type` field; `WireMessage` mirrors
//! that shape 1:1 using serde's internally-tagged representation, the same
//! pattern the corpus uses for every WebSocket protocol enum in this tree.
//!
//! This crate has no network code of its own — it only defines the schema
//! and the small set of constants (hop-by-hop headers, close codes) that
//! both sides must agree on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hop-by-hop headers stripped before a request is forwarded, plus the
/// routing header the middleware consumes itself. Never appears in an
/// `http_request` frame, regardless of whether the user sent it.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "x-target-slave",
];

/// Response headers that must never be echoed back to the user verbatim;
/// the tunnel's own framing replaces whatever the local service said here.
pub const RESPONSE_STRIP_HEADERS: &[&str] = &["transfer-encoding", "connection"];

/// Close codes used on `/cluster/tunnel`. See spec §6/§7.
pub mod close_code {
    pub const AUTH_TIMEOUT: u16 = 4001;
    pub const AUTH_FAILED: u16 = 4002;
    pub const EXPECTED_AUTH: u16 = 4003;
    pub const REPLACED: u16 = 4004;
}

/// Which local channel a WS tunnel targets. `ws` maps to `/ws`, `shell` to
/// `/shell` on the slave's local service.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Ws,
    Shell,
}

impl Channel {
    /// The local path this channel is dialed against on the slave.
    pub fn local_path(self) -> &'static str {
        match self {
            Channel::Ws => "/ws",
            Channel::Shell => "/shell",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ws" => Ok(Channel::Ws),
            "shell" => Ok(Channel::Shell),
            _ => Err(()),
        }
    }
}

/// All messages exchanged over a slave's control connection.
///
/// `#[serde(tag = "type", rename_all = "snake_case")]` serializes each
/// variant as `{"type": "...", ...fields}`. The `Unknown` variant uses
/// `#[serde(other)]` so a frame with an unrecognized `type` still decodes
/// instead of failing outright — the spec requires logging and ignoring
/// unknown types, not closing the connection.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// slave → master: authentication handshake.
    Auth {
        slave_id: String,
        slave_name: String,
        secret: String,
    },

    /// master → slave: handshake accepted.
    AuthSuccess { slave_id: String },

    /// master → slave: forward this HTTP request to the local service.
    HttpRequest {
        request_id: String,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Option<String>,
    },

    /// slave → master: the local service's response (or a forwarding error).
    Response {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// master → slave: open a local WebSocket for this tunnel.
    WsTunnelOpen {
        tunnel_id: String,
        channel: Channel,
        token: String,
    },

    /// master → slave: deliver a frame from the user-side WebSocket.
    WsMessage { tunnel_id: String, data: String },

    /// slave → master: deliver a frame from the local WebSocket.
    WsData { tunnel_id: String, data: String },

    /// master → slave: close and forget this tunnel.
    WsTunnelClose { tunnel_id: String },

    /// slave → master: the local WebSocket closed.
    WsTunnelClosed { tunnel_id: String },

    /// slave → master: application-level heartbeat.
    Ping { timestamp: i64 },

    /// master → slave: heartbeat reply.
    Pong { timestamp: i64 },

    /// slave → master: a tunnel- or request-scoped error.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tunnel_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: String,
    },

    /// Any `type` this version of the protocol does not recognize. Logged
    /// and dropped by the receiver; never constructed by a sender.
    #[serde(other)]
    Unknown,
}

/// Error decoding a single frame off the wire. Per spec §4.1/§7, a single
/// malformed frame is logged and dropped — it never closes the connection,
/// so callers should log this and `continue`, not propagate it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed JSON frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one text frame into a `WireMessage`.
pub fn decode_frame(text: &str) -> Result<WireMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a `WireMessage` as the text frame sent over the control
/// connection. Infallible in practice (no non-serializable fields), but
/// returns `Result` so callers don't need to `unwrap` at the call site.
pub fn encode_frame(msg: &WireMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Remove hop-by-hop and routing headers before a request is forwarded, or
/// before a response is copied back to the user. Header names are compared
/// case-insensitively; the caller is expected to have already lower-cased
/// keys (HTTP header maps in both axum and reqwest do this for us).
pub fn strip_headers(headers: &mut HashMap<String, String>, strip: &[&str]) {
    for name in strip {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_round_trips() {
        let msg = WireMessage::Auth {
            slave_id: "s1".into(),
            slave_name: "Slave One".into(),
            secret: "shh".into(),
        };
        let text = encode_frame(&msg).unwrap();
        assert!(text.contains("\"type\":\"auth\""));
        let back = decode_frame(&text).unwrap();
        match back {
            WireMessage::Auth { slave_id, .. } => assert_eq!(slave_id, "s1"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_decodes_to_unknown_variant() {
        let msg = decode_frame(r#"{"type":"something_from_the_future"}"#).unwrap();
        assert!(matches!(msg, WireMessage::Unknown));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        let err = decode_frame("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn strip_headers_removes_hop_by_hop_and_routing_header() {
        let mut headers = HashMap::new();
        headers.insert("connection".to_string(), "keep-alive".to_string());
        headers.insert("x-target-slave".to_string(), "s1".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        strip_headers(&mut headers, HOP_BY_HOP_HEADERS);
        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("x-target-slave"));
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn channel_maps_to_local_path() {
        assert_eq!(Channel::Ws.local_path(), "/ws");
        assert_eq!(Channel::Shell.local_path(), "/shell");
    }
}
