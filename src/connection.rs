//! Connection Context
//!
//! Constructs and tears down the per-connection task graph described in
//! `SPEC_FULL.md` §4.2: dial the upstream WebSocket, start the shared
//! Response Queue consumer and Correlation Table sweep, dispatch to the
//! chosen downstream mode, and join every task under an "any-fails-all-fail"
//! discipline (`SPEC_FULL.md` §5). Ported from the `connect_to_server`
//! function of `examples/original_source/mcp_pipe.py`.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::config::Mode;
use crate::error::{BridgeError, Result};
use crate::queue::{CorrelationTable, ResponseQueue};
use crate::rpc::{Envelope, MessageKind};
use crate::transport;

/// Timeout for a single WS send of an application message
/// (`SPEC_FULL.md` §5 "Cancellation/timeouts").
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Run one connection episode: dial `endpoint`, wire it to `mode`, and run
/// until any task fails or the upstream closes. Always returns once the
/// episode ends; the caller (the Supervisor) decides whether and how to
/// retry.
///
/// `on_connected` is invoked the instant the WebSocket handshake succeeds,
/// before any pipe task starts, so the Supervisor can reset its attempt
/// counter and backoff immediately (`SPEC_FULL.md` §4.1: "On successful
/// WebSocket handshake, reset the attempt counter to 0 and backoff to 1"),
/// rather than only after the whole episode later ends.
pub async fn run_connection(
    endpoint: &str,
    mode: &Mode,
    client: &Client,
    on_connected: impl FnOnce(),
) -> Result<()> {
    let (ws_stream, _response) = connect_async(endpoint).await.map_err(BridgeError::from)?;
    tracing::info!(endpoint, "WebSocket handshake succeeded");
    on_connected();

    let (ws_write, ws_read) = ws_stream.split();

    let queue = Arc::new(ResponseQueue::new());
    let correlation = Arc::new(CorrelationTable::new());
    let shutdown = CancellationToken::new();
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let (to_mode_tx, to_mode_rx) = mpsc::unbounded_channel::<String>();
    let (ping_tx, ping_rx) = mpsc::unbounded_channel::<WsMessage>();
    let (close_tx, close_rx) = mpsc::unbounded_channel::<u16>();

    let mut sweep = tokio::spawn({
        let correlation = Arc::clone(&correlation);
        let shutdown = shutdown.clone();
        async move {
            correlation.run_sweep_loop(shutdown).await;
        }
    });

    let mut reader: JoinHandle<Result<()>> = tokio::spawn(run_reader(
        ws_read,
        to_mode_tx,
        Arc::clone(&last_pong),
    ));

    let mut writer: JoinHandle<Result<()>> = tokio::spawn(run_writer(
        ws_write,
        Arc::clone(&queue),
        ping_rx,
        close_rx,
        shutdown.clone(),
    ));

    let mut mode_handle: JoinHandle<Result<()>> = spawn_mode(
        mode,
        client.clone(),
        to_mode_rx,
        ping_tx,
        Arc::clone(&last_pong),
        Arc::clone(&queue),
        Arc::clone(&correlation),
    );

    let result = tokio::select! {
        r = &mut reader => join(r),
        r = &mut writer => join(r),
        r = &mut mode_handle => join(r),
    };

    if let Err(BridgeError::DownstreamInternal(_)) = &result {
        tracing::warn!("downstream reported 4004, closing WebSocket with code 4004");
        let _ = close_tx.send(4004);
        let _ = tokio::time::timeout(Duration::from_secs(2), &mut writer).await;
    }

    shutdown.cancel();
    reader.abort();
    writer.abort();
    mode_handle.abort();
    sweep.abort();
    let _ = tokio::join!(reader, writer, mode_handle, sweep);

    result
}

fn spawn_mode(
    mode: &Mode,
    client: Client,
    to_mode_rx: mpsc::UnboundedReceiver<String>,
    ping_tx: mpsc::UnboundedSender<WsMessage>,
    last_pong: Arc<Mutex<Instant>>,
    queue: Arc<ResponseQueue>,
    correlation: Arc<CorrelationTable>,
) -> JoinHandle<Result<()>> {
    match mode.clone() {
        Mode::Stdio { script_path, script_args } => tokio::spawn(transport::stdio::run(
            script_path,
            script_args,
            to_mode_rx,
            queue,
            correlation,
        )),
        Mode::Sse { sse_url } => tokio::spawn(transport::sse::run(
            client, sse_url, to_mode_rx, queue, correlation,
        )),
        Mode::StreamableHttp { streamable_url } => tokio::spawn(transport::streamable::run(
            client,
            streamable_url,
            to_mode_rx,
            ping_tx,
            last_pong,
            queue,
            correlation,
        )),
    }
}

fn join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(BridgeError::Transport(format!(
            "connection task panicked: {e}"
        ))),
    }
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsSource = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn run_reader(
    mut ws_read: WsSource,
    to_mode_tx: mpsc::UnboundedSender<String>,
    last_pong: Arc<Mutex<Instant>>,
) -> Result<()> {
    while let Some(message) = ws_read.next().await {
        let message = message.map_err(BridgeError::from)?;
        match message {
            WsMessage::Text(text) => {
                if to_mode_tx.send(text).is_err() {
                    return Ok(());
                }
            }
            WsMessage::Pong(_) => {
                *last_pong.lock().await = Instant::now();
            }
            WsMessage::Close(frame) => {
                return Err(BridgeError::WebSocketClosed(format!("{frame:?}")));
            }
            _ => {}
        }
    }
    Err(BridgeError::WebSocketClosed("stream ended".to_string()))
}

async fn run_writer(
    mut ws_write: WsSink,
    queue: Arc<ResponseQueue>,
    mut ping_rx: mpsc::UnboundedReceiver<WsMessage>,
    mut close_rx: mpsc::UnboundedReceiver<u16>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            code = close_rx.recv() => {
                if let Some(code) = code {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "downstream internal error".into(),
                    };
                    let _ = ws_write.send(WsMessage::Close(Some(frame))).await;
                }
                return Ok(());
            }
            ping = ping_rx.recv() => {
                if let Some(frame) = ping {
                    if let Err(error) = ws_write.send(frame).await {
                        return Err(BridgeError::from(error));
                    }
                }
            }
            message = queue.get() => {
                match message {
                    Some(raw) => {
                        let payload = normalize_queue_message(&raw);
                        log_outbound(&payload);
                        let send = ws_write.send(WsMessage::Text(payload));
                        match tokio::time::timeout(WS_SEND_TIMEOUT, send).await {
                            Ok(Ok(())) => {}
                            Ok(Err(error)) => return Err(BridgeError::from(error)),
                            Err(_) => {
                                return Err(BridgeError::WebSocketClosed(
                                    "send timed out after 20s".to_string(),
                                ))
                            }
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

/// Re-derive a clean JSON-RPC payload from a dequeued message that may still
/// carry raw SSE framing (`event:`/`data:` prefixes), per `SPEC_FULL.md` §4.6.
fn normalize_queue_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("event:") || trimmed.starts_with("data:")) {
        return raw.to_string();
    }

    let payload = trimmed
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| payload.to_string()),
        Err(_) => payload.to_string(),
    }
}

fn log_outbound(payload: &str) {
    match Envelope::parse(payload).map(|e| e.classify()) {
        Some(MessageKind::ToolCall { tool_name }) => {
            tracing::debug!(tool_name, "sending tool call to WebSocket")
        }
        Some(MessageKind::ToolsList { count }) => {
            tracing::debug!(count, "sending tools list to WebSocket")
        }
        Some(MessageKind::ToolResult) => tracing::debug!("sending tool result to WebSocket"),
        Some(MessageKind::ErrorResponse { message }) => {
            tracing::debug!(message, "sending error response to WebSocket")
        }
        Some(MessageKind::MethodCall { method }) => {
            tracing::debug!(method, "sending method call to WebSocket")
        }
        Some(MessageKind::Other) | None => tracing::debug!("sending message to WebSocket"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_queue_message_passthrough_json() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        assert_eq!(normalize_queue_message(raw), raw);
    }

    #[test]
    fn test_normalize_queue_message_extracts_data_line() {
        let raw = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1}";
        let normalized = normalize_queue_message(raw);
        let parsed: serde_json::Value = serde_json::from_str(&normalized).unwrap();
        assert_eq!(parsed["id"], 1);
    }

    #[test]
    fn test_normalize_queue_message_raw_data_when_not_json() {
        let raw = "data: plain text";
        assert_eq!(normalize_queue_message(raw), "plain text");
    }
}
