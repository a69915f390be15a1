//! Stdio transport integration tests over in-memory duplex streams.

use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    time::{Duration, timeout},
};

use mcplex::{
    StdioTransport,
    testutils::{make_duplex_pair, sample_engine},
};

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) {
    writer.write_all(line.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
    writer.flush().await.unwrap();
}

async fn read_json<R: tokio::io::AsyncRead + Unpin>(lines: &mut Lines<BufReader<R>>) -> Value {
    let line = timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("timed out waiting for a response line")
        .expect("read failed")
        .expect("stream closed early");
    serde_json::from_str(&line).expect("response line is not valid JSON")
}

#[tokio::test]
async fn test_parse_error_recovery() {
    let transport = StdioTransport::new(sample_engine());
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();

    let serve = transport.clone();
    let task =
        tokio::spawn(async move { serve.run_with(server_reader, server_writer).await });

    let mut writer = client_writer;
    let mut lines = BufReader::new(client_reader).lines();

    // A malformed line produces -32700 with a null id...
    write_line(&mut writer, "{invalid json").await;
    let error = read_json(&mut lines).await;
    assert_eq!(error["error"]["code"], json!(-32700));
    assert_eq!(error["id"], Value::Null);

    // ...and does not consume the following valid message.
    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"1","method":"initialize","params":{}}"#,
    )
    .await;
    let response = read_json(&mut lines).await;
    assert_eq!(response["id"], json!("1"));
    assert_eq!(response["result"]["protocolVersion"], json!("2025-03-26"));

    // End-of-input terminates the transport cleanly.
    drop(writer);
    timeout(Duration::from_secs(2), task)
        .await
        .expect("transport did not stop on EOF")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_request_response_flow() {
    let transport = StdioTransport::new(sample_engine());
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();

    let serve = transport.clone();
    let task =
        tokio::spawn(async move { serve.run_with(server_reader, server_writer).await });

    let mut writer = client_writer;
    let mut lines = BufReader::new(client_reader).lines();

    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"init","method":"initialize","params":{}}"#,
    )
    .await;
    let init = read_json(&mut lines).await;
    assert_eq!(init["result"]["serverInfo"]["name"], json!("test-server"));

    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"1","method":"tools/execute","params":{"id":"calculate","params":{"operation":"add","x":2,"y":3}}}"#,
    )
    .await;
    let sum = read_json(&mut lines).await;
    assert_eq!(sum["id"], json!("1"));
    assert_eq!(sum["result"], json!(5));

    // Responses arrive in request order on the same connection.
    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"2","method":"tools/list"}"#,
    )
    .await;
    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"3","method":"prompts/list"}"#,
    )
    .await;
    let second = read_json(&mut lines).await;
    let third = read_json(&mut lines).await;
    assert_eq!(second["id"], json!("2"));
    assert_eq!(third["id"], json!("3"));

    drop(writer);
    timeout(Duration::from_secs(2), task)
        .await
        .expect("transport did not stop on EOF")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_notification_produces_no_response() {
    let transport = StdioTransport::new(sample_engine());
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();

    let serve = transport.clone();
    let task =
        tokio::spawn(async move { serve.run_with(server_reader, server_writer).await });

    let mut writer = client_writer;
    let mut lines = BufReader::new(client_reader).lines();

    // No id: a notification. The server must not fabricate one.
    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","method":"tools/list"}"#,
    )
    .await;
    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"after","method":"initialize","params":{}}"#,
    )
    .await;

    // The first response on the wire answers the request, not the
    // notification.
    let response = read_json(&mut lines).await;
    assert_eq!(response["id"], json!("after"));

    drop(writer);
    timeout(Duration::from_secs(2), task)
        .await
        .expect("transport did not stop on EOF")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_streaming_counter_over_stdio() {
    let transport = StdioTransport::new(sample_engine());
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();

    let serve = transport.clone();
    let task =
        tokio::spawn(async move { serve.run_with(server_reader, server_writer).await });

    let mut writer = client_writer;
    let mut lines = BufReader::new(client_reader).lines();

    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"init","method":"initialize","params":{}}"#,
    )
    .await;
    read_json(&mut lines).await;

    write_line(
        &mut writer,
        r#"{"jsonrpc":"2.0","id":"1","method":"tools/execute","params":{"id":"counter","params":{"count":2}}}"#,
    )
    .await;

    let started = read_json(&mut lines).await;
    assert_eq!(started["id"], json!("1"));
    assert_eq!(started["result"]["status"], json!("streaming_started"));

    let first = read_json(&mut lines).await;
    assert_eq!(first["method"], json!("progress"));
    assert_eq!(first["params"]["numbers"], json!([1]));

    let second = read_json(&mut lines).await;
    assert_eq!(second["params"]["numbers"], json!([1, 2]));
    assert_eq!(second["params"]["progress"], json!(100));

    let terminal = read_json(&mut lines).await;
    assert_eq!(terminal["id"], json!("1"));
    assert_eq!(terminal["result"]["status"], json!("complete"));
    assert_eq!(terminal["result"]["data"], json!({"numbers": [1, 2]}));

    drop(writer);
    timeout(Duration::from_secs(2), task)
        .await
        .expect("transport did not stop on EOF")
        .unwrap()
        .unwrap();
}
