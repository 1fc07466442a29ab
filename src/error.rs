//! Error types for the MCP pipe bridge
//!
//! This module defines all error types used throughout the bridge, using
//! `thiserror` for ergonomic error handling. Library-facing functions return
//! [`Result<T>`]; `main` itself works in terms of `anyhow::Result` so it can
//! attach context freely at the top level.

use thiserror::Error;

/// Main error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration-related errors (missing key, unsupported mode, bad YAML shape).
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested mode is not one of `stdio`, `sse`, `streamable_http`.
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Generic MCP/transport-level error not covered by a more specific variant.
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Transport I/O failure (spawn failure, pipe closed, connection refused).
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream WebSocket connection closed, forcing a reconnect.
    #[error("websocket connection closed: {0}")]
    WebSocketClosed(String),

    /// A downstream HTTP request returned an unexpected or erroring status.
    #[error("downstream HTTP error: status={status}, body={body}")]
    HttpStatus {
        /// The HTTP status code returned by the downstream server.
        status: u16,
        /// The response body, truncated to a few hundred bytes for logging.
        body: String,
    },

    /// The downstream server reported an internal error (JSON-RPC `error.code == 4004`).
    #[error("downstream internal error (4004): {0}")]
    DownstreamInternal(String),

    /// The response queue is full and the message was dropped.
    #[error("response queue is full, message dropped")]
    QueueFull,

    /// Failed to parse a Server-Sent Events frame.
    #[error("failed to parse SSE event: {0}")]
    SseParse(String),

    /// IO errors (child process spawn/pipe failures, file reads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket client errors.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for bridge operations.
///
/// This is a convenience alias that uses [`BridgeError`] as the error type so
/// call sites can match on a distinguishable failure kind instead of string
/// matching.
pub type Result<T> = std::result::Result<T, BridgeError>;
