//! SSE downstream mode
//!
//! Ingress (GET stream) and egress (WS→POST) for `SPEC_FULL.md` §4.4.
//! The block-parsing shape is adapted from the teacher's `parse_sse_stream`/
//! `process_sse_event` (see
//! `examples/xbcsmith-xzatoma/src/mcp/transport/http.rs`), but the event
//! dispatch (`endpoint` vs `message`) and the message-endpoint/path-
//! normalization logic are ported from `pipe_websocket_to_sse`/
//! `pipe_sse_to_websocket` in `examples/original_source/mcp_pipe.py`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::heartbeat::run_http_heartbeat;
use crate::queue::{CorrelationTable, ResponseQueue};
use crate::rpc::Envelope;
use crate::session::initialize_session;

/// Interval at which the egress task polls for the message endpoint before
/// it is learned from the ingress stream (`SPEC_FULL.md` §4.4).
const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One connection episode's SSE-mode state shared between ingress and egress.
#[derive(Default)]
struct SseState {
    message_endpoint: RwLock<Option<String>>,
}

/// Run the SSE mode for one connection episode.
///
/// `sse_url` is the long-lived GET stream URL; the base URL used for POSTs
/// is `sse_url` with a trailing `/sse` path segment stripped.
pub async fn run(
    client: Client,
    sse_url: String,
    mut ws_rx: mpsc::UnboundedReceiver<String>,
    queue: Arc<ResponseQueue>,
    correlation: Arc<CorrelationTable>,
) -> Result<()> {
    let base_url = strip_sse_suffix(&sse_url);
    let state = Arc::new(SseState::default());
    let session_id = Arc::new(RwLock::new(None));
    let shutdown = CancellationToken::new();

    let response = client
        .get(&sse_url)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(BridgeError::from)?;
    if response.status().as_u16() != 200 {
        return Err(BridgeError::HttpStatus {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }

    let ingress = {
        let state = Arc::clone(&state);
        let queue = Arc::clone(&queue);
        let correlation = Arc::clone(&correlation);
        tokio::spawn(async move {
            run_ingress(response.bytes_stream(), state, queue, correlation).await
        })
    };

    // The HTTP heartbeat must POST to the resolved `/message` URL (with its
    // session query string), not the SSE GET base -- it is only known once
    // `run_egress` has observed the `event: endpoint` block and normalized
    // it (`SPEC_FULL.md` §4.4/§4.8; `mcp_pipe.py`'s `send_heartbeat(session,
    // full_endpoint, session_id)`). A one-shot channel hands that URL to the
    // heartbeat task the moment it is resolved.
    let (post_url_tx, post_url_rx) = oneshot::channel();

    let egress = {
        let state = Arc::clone(&state);
        let client = client.clone();
        let base_url = base_url.clone();
        let session_id = Arc::clone(&session_id);
        let correlation = Arc::clone(&correlation);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_egress(
                client,
                base_url,
                state,
                &mut ws_rx,
                session_id,
                correlation,
                shutdown,
                post_url_tx,
            )
            .await
        })
    };

    let heartbeat = {
        let client = client.clone();
        let session_id = Arc::clone(&session_id);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let post_url = match post_url_rx.await {
                Ok(url) => url,
                Err(_) => return Ok(()),
            };
            run_http_heartbeat(client, post_url, session_id, shutdown).await
        })
    };

    let result = tokio::select! {
        result = ingress => join(result),
        result = egress => join(result),
        result = heartbeat => join(result),
    };
    shutdown.cancel();
    result
}

fn join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(BridgeError::Transport(format!("sse task panicked: {e}"))),
    }
}

/// Strip a trailing `/sse` path segment to compute the POST base URL.
fn strip_sse_suffix(url: &str) -> String {
    url.strip_suffix("/sse").unwrap_or(url).to_string()
}

/// Collapse any path segment containing `/message` down to `/message`,
/// preserving the query string (`SPEC_FULL.md` §4.4, §9 "path normalization").
fn normalize_message_path(base_url: &str, endpoint: &str) -> String {
    let (path, query) = match endpoint.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (endpoint, None),
    };
    let normalized_path = if path.contains("/message") {
        "/message"
    } else {
        path
    };

    let base = base_url.trim_end_matches('/');
    let mut url = format!("{base}{normalized_path}");
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    url
}

async fn run_ingress(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    state: Arc<SseState>,
    queue: Arc<ResponseQueue>,
    correlation: Arc<CorrelationTable>,
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
            handle_event_block(&block, &state, &queue, &correlation).await;
        }
    }

    Ok(())
}

async fn handle_event_block(
    block: &str,
    state: &SseState,
    queue: &ResponseQueue,
    correlation: &CorrelationTable,
) {
    let mut event_type: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        }
    }

    if event_type.is_none() && data_lines.is_empty() {
        return;
    }

    let data = data_lines.join("\n");

    match event_type {
        Some("endpoint") => {
            let mut endpoint = state.message_endpoint.write().await;
            *endpoint = Some(data);
        }
        Some("message") | None => {
            if data.is_empty() {
                return;
            }
            dispatch_message_event(&data, queue, correlation).await;
        }
        Some(_) => {}
    }
}

async fn dispatch_message_event(data: &str, queue: &ResponseQueue, correlation: &CorrelationTable) {
    let payload = match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => {
            if let Some(inner) = value.get("message") {
                match inner {
                    serde_json::Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_else(|_| data.to_string()),
                }
            } else {
                data.to_string()
            }
        }
        Err(error) => {
            tracing::warn!(%error, "failed to parse SSE message event as JSON");
            data.to_string()
        }
    };

    if let Some(envelope) = Envelope::parse(&payload) {
        if let Some(result) = &envelope.result {
            if let Some(tools) = result.get("tools").and_then(|t| t.as_array()) {
                tracing::info!(count = tools.len(), "tools/list result received");
            }
        }
        if let Some(id) = &envelope.id {
            if let Some(tool_name) = correlation.remove(&id.to_string()).await {
                tracing::debug!(tool_name, "correlated tool-call response");
            }
        }
    }

    if let Err(error) = queue.add(payload).await {
        tracing::warn!(%error, "failed to enqueue SSE message event");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_egress(
    client: Client,
    base_url: String,
    state: Arc<SseState>,
    ws_rx: &mut mpsc::UnboundedReceiver<String>,
    session_id: Arc<RwLock<Option<String>>>,
    correlation: Arc<CorrelationTable>,
    shutdown: CancellationToken,
    post_url_tx: oneshot::Sender<String>,
) -> Result<()> {
    let endpoint = loop {
        if let Some(endpoint) = state.message_endpoint.read().await.clone() {
            break endpoint;
        }
        tokio::select! {
            _ = tokio::time::sleep(ENDPOINT_POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => return Ok(()),
        }
    };

    let post_url = normalize_message_path(&base_url, &endpoint);
    let _ = post_url_tx.send(post_url.clone());

    if let Some(id) = initialize_session(&client, &post_url).await {
        *session_id.write().await = Some(id);
    }

    while let Some(message) = ws_rx.recv().await {
        let body = if let Some(envelope) = Envelope::parse(&message) {
            if let (Some(tool_name), Some(id)) =
                (envelope.tool_call_name(), envelope.id.as_ref())
            {
                correlation.insert(id.to_string(), tool_name).await;
            }
            message
        } else if !message.trim_start().starts_with('{') {
            serde_json::json!({ "message": message }).to_string()
        } else {
            message
        };

        let response = client
            .post(&post_url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(BridgeError::from)?;

        let status = response.status().as_u16();
        if !(status == 200 || status == 202) {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(status, body = %text, "SSE egress POST returned non-success status");
        }
    }

    Ok(())
}
