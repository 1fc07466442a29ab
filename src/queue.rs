//! Response Queue and Correlation Table
//!
//! Ported from the `ResponseQueue` class of the original pipe implementation
//! (`examples/original_source/mcp_pipe.py`). The original used a single
//! `asyncio.Queue(maxsize=1000)` plus two parallel dicts (`tool_requests`,
//! `request_timestamps`) protected by the interpreter's cooperative
//! single-threadedness. Here the queue is a bounded `tokio::sync::mpsc`
//! channel and the correlation table is a `tokio::sync::Mutex`-guarded
//! `HashMap`, since multiple tasks touch it concurrently (see `SPEC_FULL.md`
//! §5).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::error::{BridgeError, Result};

/// Queue capacity (`SPEC_FULL.md` §3 "Response Queue").
pub const QUEUE_CAPACITY: usize = 1000;
/// Timeout for enqueueing a message before it is dropped.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single dequeue attempt; the consumer re-waits on expiry.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(30);
/// Time-to-live for a correlation table entry.
pub const CORRELATION_TTL: Duration = Duration::from_secs(300);
/// Interval between correlation table sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Bounded FIFO carrying downstream responses to the WS consumer task.
///
/// Enqueue blocks up to [`ENQUEUE_TIMEOUT`] for room; on expiry the message is
/// dropped and [`BridgeError::QueueFull`] is returned (non-blocking
/// add-with-drop policy, per the open question recorded in `DESIGN.md`).
/// Dequeue blocks up to [`DEQUEUE_TIMEOUT`] and, on expiry, simply loops back
/// to waiting rather than surfacing an error -- the queue has no natural
/// "empty" failure mode, only a caller that wants to poll a cancellation
/// token between waits.
pub struct ResponseQueue {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
}

impl ResponseQueue {
    /// Create a new queue with the standard capacity.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue `message`, waiting up to [`ENQUEUE_TIMEOUT`] for room.
    pub async fn add(&self, message: String) -> Result<()> {
        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::Transport(
                "response queue consumer dropped".to_string(),
            )),
            Err(_) => Err(BridgeError::QueueFull),
        }
    }

    /// Dequeue the next message, waiting up to [`DEQUEUE_TIMEOUT`]. Returns
    /// `Ok(None)` on a bare timeout so the caller can loop and re-wait
    /// (`SPEC_FULL.md` §4.6), or `Ok(None)` once the producer side has
    /// dropped and the channel is drained.
    pub async fn get(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        loop {
            match tokio::time::timeout(DEQUEUE_TIMEOUT, rx.recv()).await {
                Ok(Some(message)) => return Some(message),
                Ok(None) => return None,
                Err(_) => continue,
            }
        }
    }
}

impl Default for ResponseQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps an in-flight JSON-RPC request id to the tool name it invoked, so a
/// later response can be logged with the tool's name instead of a bare id
/// (`SPEC_FULL.md` §3 "Correlation Table").
pub struct CorrelationTable {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl CorrelationTable {
    /// Create an empty correlation table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `request_id` invoked `tool_name`, timestamped now.
    pub async fn insert(&self, request_id: String, tool_name: String) {
        let mut entries = self.entries.lock().await;
        entries.insert(request_id, (tool_name, Instant::now()));
    }

    /// Look up the tool name for `request_id`, if still present and unexpired.
    pub async fn lookup(&self, request_id: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(request_id).map(|(name, _)| name.clone())
    }

    /// Remove and return the tool name for `request_id`. Called when a
    /// downstream→WS message carries a matching `id`: the entry is drained,
    /// the tool name used only for the log line (`SPEC_FULL.md` §3).
    pub async fn remove(&self, request_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        entries.remove(request_id).map(|(name, _)| name)
    }

    /// Remove entries older than [`CORRELATION_TTL`]. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, inserted_at)| now.duration_since(*inserted_at) < CORRELATION_TTL);
        before - entries.len()
    }

    /// Run the periodic sweep loop until `shutdown` fires. Intended to be
    /// spawned as one of the Connection Context's structured-concurrency
    /// tasks (`SPEC_FULL.md` §5).
    pub async fn run_sweep_loop(
        &self,
        shutdown: tokio_util::sync::CancellationToken,
    ) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.sweep().await;
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired correlation table entries");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
