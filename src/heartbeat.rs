//! HTTP and WebSocket heartbeats
//!
//! Ported from `send_heartbeat` and `websocket_heartbeat` in the original
//! pipe implementation (`examples/original_source/mcp_pipe.py`). Both
//! heartbeats run as independent tasks under a Connection Context and
//! participate in the "any-fails-all-fail" discipline (`SPEC_FULL.md` §5):
//! a failed heartbeat returns an error that tears down the whole connection
//! and triggers a Supervisor reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// Cadence shared by both heartbeats (`SPEC_FULL.md` §4.8, §9 "Heartbeat interval drift").
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
/// Maximum time to wait for a pong after a WebSocket ping.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// POST a `ping` request every [`HEARTBEAT_INTERVAL`] to `url`, echoing the
/// current session id when known. Returns `Err` on a 4004 status (the
/// downstream signalling the session is gone) or on a repeated transport
/// failure; other failures are logged as warnings and the loop continues.
pub async fn run_http_heartbeat(
    client: reqwest::Client,
    url: String,
    session_id: Arc<RwLock<Option<String>>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return Ok(()),
        }

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "ping",
            "params": {},
        });
        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(id) = session_id.read().await.clone() {
            request = request.header("Mcp-Session-Id", id);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == 4004 {
                    return Err(BridgeError::DownstreamInternal(
                        "heartbeat POST received 4004".to_string(),
                    ));
                }
                if !(status == 200 || status == 202) {
                    let text = response.text().await.unwrap_or_default();
                    tracing::warn!(status, body = %text, "heartbeat POST returned non-success status");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "heartbeat POST failed");
            }
        }
    }
}

/// Send a WebSocket ping every [`HEARTBEAT_INTERVAL`] via `ping_tx`, and fail
/// the connection if `last_pong` has not advanced within [`PONG_TIMEOUT`] of
/// the ping being sent. The caller's WebSocket read loop is responsible for
/// updating `last_pong` whenever a `Pong` frame arrives.
pub async fn run_ws_heartbeat(
    ping_tx: mpsc::UnboundedSender<WsMessage>,
    last_pong: Arc<Mutex<Instant>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return Ok(()),
        }

        let sent_at = Instant::now();
        if ping_tx.send(WsMessage::Ping(Vec::new())).is_err() {
            return Err(BridgeError::WebSocketClosed(
                "ping channel closed".to_string(),
            ));
        }

        tokio::time::sleep(PONG_TIMEOUT).await;
        let observed = *last_pong.lock().await;
        if observed < sent_at {
            return Err(BridgeError::WebSocketClosed(
                "no pong within timeout".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_heartbeat_4004_returns_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(4004))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let session_id = Arc::new(RwLock::new(None));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_http_heartbeat(
            client,
            server.uri(),
            session_id,
            shutdown,
        ));

        let result = tokio::time::timeout(Duration::from_secs(25), handle)
            .await
            .expect("heartbeat task should complete")
            .expect("task should not panic");
        assert!(matches!(result, Err(BridgeError::DownstreamInternal(_))));
    }

    #[tokio::test]
    async fn test_http_heartbeat_shutdown_returns_ok() {
        let client = reqwest::Client::new();
        let session_id = Arc::new(RwLock::new(None));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = run_http_heartbeat(
            client,
            "http://127.0.0.1:1/ignored".to_string(),
            session_id,
            shutdown,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_ws_heartbeat_fails_without_pong() {
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();
        let last_pong = Arc::new(Mutex::new(Instant::now() - Duration::from_secs(60)));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_ws_heartbeat(ping_tx, last_pong, shutdown));
        assert!(ping_rx.recv().await.is_some());

        let result = tokio::time::timeout(Duration::from_secs(35), handle)
            .await
            .expect("heartbeat task should complete")
            .expect("task should not panic");
        assert!(matches!(result, Err(BridgeError::WebSocketClosed(_))));
    }
}
