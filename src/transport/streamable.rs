//! streamable_http downstream mode
//!
//! Per `SPEC_FULL.md` §4.5: every client-to-server Message is POSTed to a
//! single endpoint whose response body is itself an SSE-framed stream,
//! drained inline. Adapted from `pipe_streamable_http` in
//! `examples/original_source/mcp_pipe.py` (nested `handle_requests`/
//! `process_requests` over a local queue) and from the teacher's
//! `parse_sse_stream`/`process_sse_event` block-parsing shape (see
//! `examples/xbcsmith-xzatoma/src/mcp/transport/http.rs`).

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::heartbeat::{run_http_heartbeat, run_ws_heartbeat};
use crate::queue::{CorrelationTable, ResponseQueue};
use crate::rpc::Envelope;
use crate::session::initialize_session;

/// Run the streamable_http mode for one connection episode.
pub async fn run(
    client: Client,
    url: String,
    mut ws_rx: mpsc::UnboundedReceiver<String>,
    ping_tx: mpsc::UnboundedSender<WsMessage>,
    last_pong: Arc<Mutex<tokio::time::Instant>>,
    queue: Arc<ResponseQueue>,
    correlation: Arc<CorrelationTable>,
) -> Result<()> {
    let session_id = Arc::new(RwLock::new(initialize_session(&client, &url).await));
    let last_event_id = Arc::new(RwLock::new(None));
    let shutdown = CancellationToken::new();

    let http_heartbeat = {
        let client = client.clone();
        let url = url.clone();
        let session_id = Arc::clone(&session_id);
        let shutdown = shutdown.clone();
        tokio::spawn(run_http_heartbeat(client, url, session_id, shutdown))
    };

    let ws_heartbeat = {
        let shutdown = shutdown.clone();
        tokio::spawn(run_ws_heartbeat(ping_tx, last_pong, shutdown))
    };

    let consumer = {
        let client = client.clone();
        let url = url.clone();
        let session_id = Arc::clone(&session_id);
        let last_event_id = Arc::clone(&last_event_id);
        let queue = Arc::clone(&queue);
        let correlation = Arc::clone(&correlation);
        tokio::spawn(async move {
            run_consumer(
                client,
                url,
                &mut ws_rx,
                session_id,
                last_event_id,
                queue,
                correlation,
            )
            .await
        })
    };

    let result = tokio::select! {
        result = http_heartbeat => join(result),
        result = ws_heartbeat => join(result),
        result = consumer => join(result),
    };
    shutdown.cancel();
    result
}

fn join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(BridgeError::Transport(format!(
            "streamable_http task panicked: {e}"
        ))),
    }
}

async fn run_consumer(
    client: Client,
    url: String,
    ws_rx: &mut mpsc::UnboundedReceiver<String>,
    session_id: Arc<RwLock<Option<String>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
    queue: Arc<ResponseQueue>,
    correlation: Arc<CorrelationTable>,
) -> Result<()> {
    while let Some(message) = ws_rx.recv().await {
        let envelope = Envelope::parse(&message);

        if let Some(envelope) = &envelope {
            if let (Some(tool_name), Some(id)) =
                (envelope.tool_call_name(), envelope.id.as_ref())
            {
                correlation.insert(id.to_string(), tool_name).await;
            }
        }

        let is_resumable = envelope.as_ref().map(Envelope::is_resumable).unwrap_or(true);

        let body = if message.trim_start().starts_with('{') {
            message
        } else {
            serde_json::json!({ "message": message }).to_string()
        };

        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        if let Some(id) = session_id.read().await.clone() {
            request = request.header("Mcp-Session-Id", id);
        }
        if is_resumable {
            if let Some(id) = last_event_id.read().await.clone() {
                request = request.header("Last-Event-ID", id);
            }
        }

        let response = request.send().await.map_err(BridgeError::from)?;
        let status = response.status().as_u16();
        if !(status == 200 || status == 202) {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::HttpStatus { status, body: text });
        }

        if let Some(new_session_id) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            let mut current = session_id.write().await;
            if current.as_deref() != Some(new_session_id) {
                *current = Some(new_session_id.to_string());
            }
        }

        drain_sse_body(response.bytes_stream(), &last_event_id, &queue, &correlation).await?;
    }

    Ok(())
}

/// Drain one POST response body, parsing SSE-framed event blocks and
/// enqueueing each block's joined `data:` lines. Returns
/// [`BridgeError::DownstreamInternal`] if any block carries
/// `error.code == 4004`, signalling the caller to close the WebSocket with
/// code 4004 and let the Supervisor reconnect.
async fn drain_sse_body(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    last_event_id: &RwLock<Option<String>>,
    queue: &ResponseQueue,
    correlation: &CorrelationTable,
) -> Result<()> {
    let mut buffer = String::new();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(BridgeError::from)?;
        let text = match std::str::from_utf8(&chunk) {
            Ok(s) => s,
            Err(_) => continue,
        };
        buffer.push_str(text);

        while let Some(pos) = buffer.find("\n\n") {
            let block = buffer[..pos].to_string();
            buffer = buffer[pos + 2..].to_string();
            process_event_block(&block, last_event_id, queue, correlation).await?;
        }
    }

    if !buffer.is_empty() {
        process_event_block(&buffer, last_event_id, queue, correlation).await?;
    }

    Ok(())
}

async fn process_event_block(
    block: &str,
    last_event_id: &RwLock<Option<String>>,
    queue: &ResponseQueue,
    correlation: &CorrelationTable,
) -> Result<()> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut id_line: Option<&str> = None;

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            id_line = Some(value.trim());
        }
    }

    if let Some(id) = id_line {
        *last_event_id.write().await = Some(id.to_string());
    }

    let data = data_lines.join("\n");
    if data.is_empty() {
        return Ok(());
    }

    if let Some(envelope) = Envelope::parse(&data) {
        if let Some(error) = &envelope.error {
            if error.code == 4004 {
                return Err(BridgeError::DownstreamInternal(error.message.clone()));
            }
        }
        if let Some(id) = &envelope.id {
            if let Some(tool_name) = correlation.remove(&id.to_string()).await {
                tracing::debug!(tool_name, "correlated tool-call response");
            }
        }
    }

    if let Err(error) = queue.add(data).await {
        tracing::warn!(%error, "failed to enqueue streamable_http event");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_event_block_stores_last_event_id() {
        let last_event_id = RwLock::new(None);
        let queue = ResponseQueue::new();
        let correlation = CorrelationTable::new();
        process_event_block(
            "id: 42\ndata: {\"jsonrpc\":\"2.0\"}",
            &last_event_id,
            &queue,
            &correlation,
        )
        .await
        .unwrap();
        assert_eq!(*last_event_id.read().await, Some("42".to_string()));
        assert_eq!(
            queue.get().await,
            Some(r#"{"jsonrpc":"2.0"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_process_event_block_4004_returns_error() {
        let last_event_id = RwLock::new(None);
        let queue = ResponseQueue::new();
        let correlation = CorrelationTable::new();
        let result = process_event_block(
            r#"data: {"jsonrpc":"2.0","error":{"code":4004,"message":"gone"}}"#,
            &last_event_id,
            &queue,
            &correlation,
        )
        .await;
        assert!(matches!(result, Err(BridgeError::DownstreamInternal(_))));
    }

    #[tokio::test]
    async fn test_process_event_block_empty_data_is_noop() {
        let last_event_id = RwLock::new(None);
        let queue = ResponseQueue::new();
        let correlation = CorrelationTable::new();
        process_event_block("id: 1", &last_event_id, &queue, &correlation)
            .await
            .unwrap();
        assert_eq!(*last_event_id.read().await, Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_process_event_block_drains_correlation_entry() {
        let last_event_id = RwLock::new(None);
        let queue = ResponseQueue::new();
        let correlation = CorrelationTable::new();
        correlation.insert("7".to_string(), "calculator".to_string()).await;
        process_event_block(
            r#"data: {"jsonrpc":"2.0","id":7,"result":{"success":true}}"#,
            &last_event_id,
            &queue,
            &correlation,
        )
        .await
        .unwrap();
        assert_eq!(correlation.lookup("7").await, None);
    }
}
