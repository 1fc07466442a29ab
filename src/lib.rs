//! mcp-pipe-rs: a transport bridge for the MCP WebSocket protocol
//!
//! Splices a persistent upstream WebSocket carrying JSON-RPC 2.0 (the "MCP"
//! protocol) onto one of three downstream transports: a locally spawned
//! child process over stdio, a remote server speaking SSE, or a remote
//! server speaking streamable HTTP. See `SPEC_FULL.md` for the full
//! component design.
//!
//! # Architecture
//!
//! - `supervisor`: the reconnection loop (exponential backoff with jitter).
//! - `connection`: per-connection task graph construction and teardown.
//! - `transport`: the three downstream mode implementations (`stdio`, `sse`,
//!   `streamable`).
//! - `queue`: the bounded Response Queue and the JSON-RPC Correlation Table.
//! - `rpc`: JSON-RPC 2.0 envelope sniffing for correlation and logging.
//! - `session`: the Session Initializer (`tools/list` bootstrap POST).
//! - `heartbeat`: HTTP and WebSocket liveness pings.
//! - `config`: YAML configuration loading and validation.
//! - `cli`: command-line argument parsing.
//! - `error`: the bridge's typed error enum.

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod queue;
pub mod rpc;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use config::{BridgeConfig, Mode};
pub use error::{BridgeError, Result};
pub use supervisor::Supervisor;
