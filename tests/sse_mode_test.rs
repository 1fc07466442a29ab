//! Integration tests for SSE downstream mode, covering scenarios S3 and S4
//! from `SPEC_FULL.md` §8.

use std::time::Duration;

use mcp_pipe_rs::queue::{CorrelationTable, ResponseQueue};
use mcp_pipe_rs::transport::sse;
use std::sync::Arc;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// S3: the endpoint bootstrap event composes the POST URL from the base
/// SSE URL and the endpoint payload's path+query string.
#[tokio::test]
async fn test_endpoint_bootstrap_drives_post_to_composed_url() {
    let server = MockServer::start().await;

    let sse_body = "event: endpoint\ndata: /m?sessionId=abc\n\n";
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": []}
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let sse_url = format!("{}/sse", server.uri());

    let (tx, rx) = mpsc::unbounded_channel();
    let queue = Arc::new(ResponseQueue::new());
    let correlation = Arc::new(CorrelationTable::new());

    let handle = tokio::spawn(sse::run(
        client,
        sse_url,
        rx,
        Arc::clone(&queue),
        correlation,
    ));

    tx.send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(tx);
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .any(|r| r.method.as_str() == "POST" && r.url.path() == "/message"));
}

/// S4: an `event: message` block whose data wraps the payload in a
/// `{"message": ...}` envelope is unwrapped before being enqueued.
#[tokio::test]
async fn test_message_event_unwraps_message_field() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "event: endpoint\ndata: /m?sessionId=abc\n\n",
        "event: message\ndata: {\"message\":{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {}
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let sse_url = format!("{}/sse", server.uri());

    let (_tx, rx) = mpsc::unbounded_channel();
    let queue = Arc::new(ResponseQueue::new());
    let correlation = Arc::new(CorrelationTable::new());

    let handle = tokio::spawn(sse::run(
        client,
        sse_url,
        rx,
        Arc::clone(&queue),
        correlation,
    ));

    let received = tokio::time::timeout(Duration::from_secs(2), queue.get())
        .await
        .expect("expected an enqueued message");
    let parsed: serde_json::Value = serde_json::from_str(&received.unwrap()).unwrap();
    assert_eq!(parsed["id"], 1);
    assert!(parsed.get("message").is_none());

    handle.abort();
}
