//! HTTP transport integration tests: plain request/response, NDJSON
//! streaming, and SSE.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};
use tracing_subscriber::fmt;

use mcplex::{
    Error, HttpTransport, Transport,
    schema::{Message, Notification},
    testutils::sample_engine,
};

async fn start_server() -> (HttpTransport, mcplex::HttpServerHandle) {
    fmt::try_init().ok();
    let transport = HttpTransport::new(sample_engine());
    let handle = transport.serve("127.0.0.1:0").await.unwrap();
    (transport, handle)
}

#[tokio::test]
async fn test_plain_request_response_flow() {
    let (_transport, handle) = start_server().await;
    let url = format!("http://{}/mcp", handle.bound_addr);
    let client = reqwest::Client::new();

    // Initialize with a stable client id.
    let response = client
        .post(&url)
        .header("x-client-id", "plain-client")
        .json(&json!({"jsonrpc": "2.0", "id": "init", "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], json!("2025-03-26"));

    // Execute the calculator.
    let response = client
        .post(&url)
        .header("x-client-id", "plain-client")
        .json(&json!({
            "jsonrpc": "2.0", "id": "1", "method": "tools/execute",
            "params": {"id": "calculate", "params": {"operation": "add", "x": 2, "y": 3}}
        }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], json!(5));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_engine_errors_are_http_200() {
    let (_transport, handle) = start_server().await;
    let url = format!("http://{}/mcp", handle.bound_addr);
    let client = reqwest::Client::new();

    // Uninitialized client id: logical error, transport success.
    let response = client
        .post(&url)
        .header("x-client-id", "fresh-client")
        .json(&json!({"jsonrpc": "2.0", "id": "1", "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32002));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_media_type() {
    let (_transport, handle) = start_server().await;
    let url = format!("http://{}/mcp", handle.bound_addr);

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_parse_error_is_http_400_with_envelope() {
    let (_transport, handle) = start_server().await;
    let url = format!("http://{}/mcp", handle.bound_addr);

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .body("{invalid json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32700));
    assert_eq!(body["id"], Value::Null);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_ndjson_streaming_counter() {
    let (_transport, handle) = start_server().await;
    let base = format!("http://{}", handle.bound_addr);
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/mcp"))
        .header("x-client-id", "ndjson-client")
        .json(&json!({"jsonrpc": "2.0", "id": "init", "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/mcp/stream"))
        .header("x-client-id", "ndjson-client")
        .header("accept", "application/x-ndjson")
        .json(&json!({
            "jsonrpc": "2.0", "id": "1", "method": "tools/execute",
            "params": {"id": "counter", "params": {"count": 3, "delay_ms": 0}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("application/x-ndjson")
    );

    let body = timeout(Duration::from_secs(5), response.text())
        .await
        .expect("stream did not terminate")
        .unwrap();
    let lines: Vec<Value> = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let expected = vec![
        json!({"jsonrpc": "2.0", "id": "1", "result": {"status": "streaming_started"}}),
        json!({"jsonrpc": "2.0", "method": "progress",
               "params": {"status": "in_progress", "progress": 33.33, "numbers": [1]}}),
        json!({"jsonrpc": "2.0", "method": "progress",
               "params": {"status": "in_progress", "progress": 66.66, "numbers": [1, 2]}}),
        json!({"jsonrpc": "2.0", "method": "progress",
               "params": {"status": "in_progress", "progress": 100, "numbers": [1, 2, 3]}}),
        json!({"jsonrpc": "2.0", "id": "1",
               "result": {"status": "complete", "data": {"numbers": [1, 2, 3]}}}),
    ];
    assert_eq!(lines, expected);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stream_path_without_accept_falls_back_to_single_response() {
    let (_transport, handle) = start_server().await;
    let base = format!("http://{}", handle.bound_addr);
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/mcp"))
        .header("x-client-id", "fallback-client")
        .json(&json!({"jsonrpc": "2.0", "id": "init", "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();

    // No Accept: application/x-ndjson, so the counter runs to completion
    // and one plain JSON response comes back.
    let response = client
        .post(format!("{base}/mcp/stream"))
        .header("x-client-id", "fallback-client")
        .json(&json!({
            "jsonrpc": "2.0", "id": "1", "method": "tools/execute",
            "params": {"id": "counter", "params": {"count": 2}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], json!({"numbers": [1, 2]}));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_sse_connected_and_routed_replies() {
    let (_transport, handle) = start_server().await;
    let base = format!("http://{}", handle.bound_addr);
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/sse"))
        .header("x-client-id", "sse-client")
        .send()
        .await
        .unwrap();
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    let mut events = response.bytes_stream().eventsource();

    let connected = timeout(Duration::from_secs(2), events.next())
        .await
        .expect("no connected event")
        .unwrap()
        .unwrap();
    assert_eq!(connected.event, "connected");
    let data: Value = serde_json::from_str(&connected.data).unwrap();
    assert_eq!(data["client_id"], json!("sse-client"));

    // Requests go to the sibling path; replies arrive on the stream.
    let post = client
        .post(format!("{base}/sse/messages"))
        .header("x-client-id", "sse-client")
        .json(&json!({"jsonrpc": "2.0", "id": "init", "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 202);

    let message = timeout(Duration::from_secs(2), events.next())
        .await
        .expect("no initialize reply on the stream")
        .unwrap()
        .unwrap();
    assert_eq!(message.event, "message");
    let reply: Value = serde_json::from_str(&message.data).unwrap();
    assert_eq!(reply["id"], json!("init"));
    assert_eq!(reply["result"]["protocolVersion"], json!("2025-03-26"));

    let post = client
        .post(format!("{base}/sse/messages"))
        .header("x-client-id", "sse-client")
        .json(&json!({"jsonrpc": "2.0", "id": "1", "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 202);

    let message = timeout(Duration::from_secs(2), events.next())
        .await
        .expect("no tools/list reply on the stream")
        .unwrap()
        .unwrap();
    let reply: Value = serde_json::from_str(&message.data).unwrap();
    assert_eq!(reply["id"], json!("1"));
    assert!(reply["result"]["tools"].is_array());

    // Release the event stream so graceful shutdown is not held open.
    drop(events);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_without_sse_clients_is_unsupported() {
    let (transport, handle) = start_server().await;

    let note = Message::Notification(Notification::progress(json!({"tick": 1})));
    assert!(matches!(
        transport.broadcast(note).await,
        Err(Error::BroadcastUnsupported)
    ));

    handle.stop().await.unwrap();
}
