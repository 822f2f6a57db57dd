//! # Local HTTP forwarding (§4.6 `http_request` handling)
//!
//! Turns an `http_request` frame from the master into an outbound call to
//! `http://localhost:<port><path>`, injecting `host` and
//! `x-cluster-internal-auth` the way the local service is expected to trust
//! (§4.6, §9). Bounded by a 30-second local timeout independent of the
//! master's own `requestTimeout` — the two are different deadlines racing
//! the same call for different reasons.

use cluster_tunnel_protocol::WireMessage;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const LOCAL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs the local call described by an `http_request` frame and builds
/// the matching `response` frame — `Response{status, headers, body}` on
/// success, `Response{error}` on any failure (bad method, connection
/// refused, timeout). Never returns an `Err`: every failure mode is a
/// valid, well-formed `response` frame to send back to the master.
pub async fn forward(
    client: &reqwest::Client,
    local_port: u16,
    secret: &str,
    request_id: String,
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Option<String>,
) -> WireMessage {
    match do_forward(client, local_port, secret, &method, &path, headers, body).await {
        Ok((status, headers, body)) => WireMessage::Response {
            request_id,
            status: Some(status),
            headers: Some(headers),
            body,
            error: None,
        },
        Err(message) => WireMessage::Response {
            request_id,
            status: None,
            headers: None,
            body: None,
            error: Some(message),
        },
    }
}

async fn do_forward(
    client: &reqwest::Client,
    local_port: u16,
    secret: &str,
    method: &str,
    path: &str,
    headers: HashMap<String, String>,
    body: Option<String>,
) -> Result<(u16, HashMap<String, String>, Option<String>), String> {
    let method = Method::from_str(method).map_err(|e| format!("invalid method: {e}"))?;
    let url = format!("http://localhost:{local_port}{path}");

    let mut header_map = HeaderMap::new();
    for (name, value) in &headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            header_map.insert(name, value);
        }
    }
    header_map.insert(
        reqwest::header::HOST,
        HeaderValue::from_str(&format!("localhost:{local_port}")).unwrap(),
    );
    header_map.insert(
        HeaderName::from_static("x-cluster-internal-auth"),
        HeaderValue::from_str(secret).map_err(|e| format!("invalid secret header: {e}"))?,
    );

    let mut req = client.request(method, url).headers(header_map);
    if let Some(body) = body {
        req = req.body(body);
    }

    let resp = tokio::time::timeout(LOCAL_CALL_TIMEOUT, req.send())
        .await
        .map_err(|_| "local request timeout".to_string())?
        .map_err(|e| format!("local request failed: {e}"))?;

    let status = resp.status().as_u16();
    let resp_headers: HashMap<String, String> = resp
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();
    let body_bytes = resp
        .bytes()
        .await
        .map_err(|e| format!("failed to read local response body: {e}"))?;
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body_bytes).into_owned())
    };

    Ok((status, resp_headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_method_becomes_an_error_response_frame() {
        let client = reqwest::Client::new();
        let msg = forward(
            &client,
            65535,
            "shh",
            "r1".into(),
            "NOT-A-METHOD ".into(),
            "/x".into(),
            HashMap::new(),
            None,
        )
        .await;
        match msg {
            WireMessage::Response { request_id, error, status, .. } => {
                assert_eq!(request_id, "r1");
                assert!(error.is_some());
                assert!(status.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_becomes_an_error_response_frame() {
        // Port 1 is privileged/unused in test sandboxes; nothing should be listening.
        let client = reqwest::Client::new();
        let msg = forward(
            &client,
            1,
            "shh",
            "r2".into(),
            "GET".into(),
            "/".into(),
            HashMap::new(),
            None,
        )
        .await;
        match msg {
            WireMessage::Response { error, .. } => assert!(error.is_some()),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
