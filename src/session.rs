//! Session Initializer
//!
//! Ported from `initialize_session` in the original pipe implementation
//! (`examples/original_source/mcp_pipe.py`). Issues the single bootstrap
//! `tools/list` POST used by both `sse` and `streamable_http` modes to learn
//! the server-assigned session id before any further traffic flows
//! (`SPEC_FULL.md` §4.7).

use reqwest::Client;

use crate::rpc::Envelope;

/// POST once to `url` with a `tools/list` request and return the session id,
/// if any, learned from the `Mcp-Session-Id` header or `result.sessionId`.
///
/// A non-200/202 status is logged and treated as "no session id learned"
/// rather than a hard failure -- callers proceed without a session id and
/// pick one up opportunistically from a later response.
pub async fn initialize_session(client: &Client, url: &str) -> Option<String> {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/list",
        "id": 1,
    });

    let response = match client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json, text/event-stream")
        .json(&body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(%error, "session initializer request failed");
            return None;
        }
    };

    let status = response.status();
    let header_session_id = response
        .headers()
        .get("Mcp-Session-Id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if !(status.as_u16() == 200 || status.as_u16() == 202) {
        let text = response.text().await.unwrap_or_default();
        tracing::warn!(%status, body = %text, "session initializer got non-success status");
        return None;
    }

    let text = match response.text().await {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!(%error, "failed to read session initializer response body");
            return header_session_id;
        }
    };

    let body_session_id = Envelope::parse(&text).and_then(|envelope| envelope.session_id());

    body_session_id.or(header_session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_prefers_body_session_id_over_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header("Accept", "application/json, text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Mcp-Session-Id", "header-session")
                    .set_body_json(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": {"sessionId": "body-session", "tools": []}
                    })),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/mcp", server.uri());
        let session_id = initialize_session(&client, &url).await;
        assert_eq!(session_id, Some("body-session".to_string()));
    }

    #[tokio::test]
    async fn test_falls_back_to_header_session_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Mcp-Session-Id", "header-only")
                    .set_body_json(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": {"tools": []}
                    })),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let session_id = initialize_session(&client, &server.uri()).await;
        assert_eq!(session_id, Some("header-only".to_string()));
    }

    #[tokio::test]
    async fn test_non_success_status_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = Client::new();
        let session_id = initialize_session(&client, &server.uri()).await;
        assert_eq!(session_id, None);
    }
}
