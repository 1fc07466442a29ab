//! JSON-RPC 2.0 envelope sniffing
//!
//! The bridge never interprets JSON-RPC semantics beyond a handful of fields
//! it needs for correlation and logging (see `SPEC_FULL.md` §3, §9). Rather
//! than pattern-matching on raw [`serde_json::Value`] keys scattered across
//! the pipe tasks, every inbound/outbound [`Message`] is parsed once into an
//! [`Envelope`] -- a struct that captures the fields of interest with a
//! `#[serde(flatten)]` fallthrough so unknown fields are never lost when the
//! envelope is re-serialized. [`Envelope::classify`] maps that struct onto a
//! [`MessageKind`] used purely for log-line labelling.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC methods the bridge never wraps in a `Last-Event-ID` resumption
/// (see `SPEC_FULL.md` §4.5 and the GLOSSARY's "Resumable message" entry).
pub const NON_RESUMABLE_METHODS: &[&str] = &["tools/list", "ping", "initialize", "session/terminate"];

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or the MCP spec.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 envelope with only the fields the bridge inspects pulled
/// out, and everything else preserved in `extra` for lossless re-serialization.
///
/// Per the REDESIGN FLAGS in `SPEC_FULL.md` §9 ("Dynamic JSON"), this
/// replaces ad hoc key lookups on a bare `Value` with a typed struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version identifier; normally `"2.0"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Request/response correlation id. Present for requests and responses,
    /// absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// The method name, present on requests and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Every other field present on the wire, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The classification of an inbound/outbound message, used only to label the
/// "Sending to WebSocket: ..." log line (`SPEC_FULL.md` §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// A `method == "tools/call"` request with `params.name` present.
    ToolCall {
        /// The invoked tool's name.
        tool_name: String,
    },
    /// A response whose `result` carries a `tools` array.
    ToolsList {
        /// Number of tools in the list.
        count: usize,
    },
    /// Any other response carrying a `result`.
    ToolResult,
    /// A response carrying an `error`.
    ErrorResponse {
        /// The error's human-readable message.
        message: String,
    },
    /// A request or notification other than `tools/call`.
    MethodCall {
        /// The method name.
        method: String,
    },
    /// Valid JSON that matched none of the above (e.g. a bare object without
    /// `method`/`result`/`error`), or text that did not parse as an envelope.
    Other,
}

impl Envelope {
    /// Parse `text` as a JSON-RPC envelope. Returns `None` if `text` is not
    /// valid JSON or is not a JSON object.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Classify this envelope for logging purposes (`SPEC_FULL.md` §4.6).
    pub fn classify(&self) -> MessageKind {
        if let Some(method) = &self.method {
            if method == "tools/call" {
                if let Some(name) = self.tool_call_name() {
                    return MessageKind::ToolCall { tool_name: name };
                }
            }
            return MessageKind::MethodCall {
                method: method.clone(),
            };
        }
        if let Some(result) = &self.result {
            if let Some(tools) = result.get("tools").and_then(Value::as_array) {
                return MessageKind::ToolsList { count: tools.len() };
            }
            return MessageKind::ToolResult;
        }
        if let Some(error) = &self.error {
            return MessageKind::ErrorResponse {
                message: error.message.clone(),
            };
        }
        MessageKind::Other
    }

    /// If this envelope is a `tools/call` request with `params.name` present,
    /// return the tool name (`SPEC_FULL.md` §3 "Correlation Table").
    pub fn tool_call_name(&self) -> Option<String> {
        if self.method.as_deref() != Some("tools/call") {
            return None;
        }
        self.params
            .as_ref()?
            .get("name")?
            .as_str()
            .map(str::to_string)
    }

    /// Whether this envelope's `method` is eligible to carry `Last-Event-ID`
    /// on a streamable-HTTP POST (`SPEC_FULL.md` §4.5, GLOSSARY "Resumable
    /// message"). Envelopes with no `method` (responses) are resumable.
    pub fn is_resumable(&self) -> bool {
        match &self.method {
            Some(method) => !NON_RESUMABLE_METHODS.contains(&method.as_str()),
            None => true,
        }
    }

    /// `result.sessionId`, used by the Session Initializer (`SPEC_FULL.md` §4.7).
    pub fn session_id(&self) -> Option<String> {
        self.result
            .as_ref()?
            .get("sessionId")?
            .as_str()
            .map(str::to_string)
    }
}
