//! Downstream pipe implementations
//!
//! Each submodule implements one of the three downstream modes named in
//! `SPEC_FULL.md` §2. Unlike the teacher's `Transport` trait (a single
//! interface implemented by swappable transports on the client side of an
//! MCP connection), the bridge's three modes have genuinely different task
//! graphs -- stdio wires a child process directly to the WebSocket, SSE and
//! streamable-HTTP each drive their own request/response shape -- so each
//! mode is a free function taking the shared Connection Context pieces
//! (WebSocket halves, [`crate::queue::ResponseQueue`],
//! [`crate::queue::CorrelationTable`]) rather than an object behind a trait.

pub mod sse;
pub mod stdio;
pub mod streamable;
