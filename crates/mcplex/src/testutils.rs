//! Test utilities for `mcplex`.
//!
//! Helpers shared by the crate's unit and integration tests: in-memory
//! duplex streams, channel-backed connections and contexts, and a small
//! set of ready-made capability handlers (calculator, streaming counter,
//! versioned readme, greeting prompt). Kept in a dedicated module so
//! external test crates can reuse them via `use mcplex::testutils::*`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{
    io::{self, AsyncRead, AsyncWrite},
    sync::mpsc,
    time::{Duration, sleep},
};

use crate::{
    config::ServerConfig,
    context::RequestContext,
    engine::RequestEngine,
    handler::{
        HandlerError, HandlerResult, ProgressSink, PromptHandler, ResourceHandler, ToolHandler,
    },
    registry::Registry,
    schema::{Message, ParameterSpec, PromptArgument, PromptBody, PromptMessage},
    transport::ConnectionHandle,
};

/// Create two independent in-memory duplex pipes forming a bidirectional
/// channel suitable for wiring up a test client and server.
///
/// The first two elements go to the server (`reader`, `writer`), the
/// remaining pair to the client.
pub fn make_duplex_pair() -> (
    impl AsyncRead + Send + Unpin + 'static,
    impl AsyncWrite + Send + Unpin + 'static,
    impl AsyncRead + Send + Unpin + 'static,
    impl AsyncWrite + Send + Unpin + 'static,
) {
    let (server_reader, client_writer) = io::duplex(8 * 1024);
    let (client_reader, server_writer) = io::duplex(8 * 1024);
    (server_reader, server_writer, client_reader, client_writer)
}

/// Create a channel-backed connection for asserting outbound traffic.
pub fn test_connection(
    client_id: &str,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    ConnectionHandle::channel(client_id)
}

/// Create a non-streaming request context plus its outbound receiver.
pub fn test_context(client_id: &str) -> (RequestContext, mpsc::UnboundedReceiver<Message>) {
    let (handle, receiver) = test_connection(client_id);
    (RequestContext::builder(handle).build(), receiver)
}

/// Create a streaming-capable request context plus its outbound receiver.
pub fn streaming_context(
    client_id: &str,
) -> (RequestContext, mpsc::UnboundedReceiver<Message>) {
    let (handle, receiver) = test_connection(client_id);
    (
        RequestContext::builder(handle).streaming(true).build(),
        receiver,
    )
}

/// Build an engine over the given registry with a fixed test identity.
pub fn test_engine(registry: Registry) -> Arc<RequestEngine> {
    Arc::new(RequestEngine::new(
        ServerConfig::new("test-server", "0.0.1"),
        registry,
    ))
}

/// Build an engine serving the sample handlers below.
pub fn sample_engine() -> Arc<RequestEngine> {
    let registry = Registry::new();
    registry
        .register_tool(Arc::new(CalculatorTool))
        .expect("register calculator");
    registry
        .register_tool(Arc::new(CounterTool))
        .expect("register counter");
    registry
        .register_resource(Arc::new(VersionedReadme))
        .expect("register readme");
    registry
        .register_prompt(Arc::new(GreetingPrompt))
        .expect("register greeting");
    test_engine(registry)
}

/// Send an `initialize` request through the engine for the context's
/// client.
pub async fn initialize_client(engine: &RequestEngine, ctx: &RequestContext) {
    let reply = engine
        .process_request(
            json!({"jsonrpc": "2.0", "id": "init", "method": "initialize", "params": {}}),
            ctx,
        )
        .await;
    match reply {
        crate::engine::EngineReply::Message(Message::Response(_)) => {}
        other => panic!("initialize failed: {other:?}"),
    }
}

/// Render a whole-number float as a JSON integer, anything else as-is.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Arithmetic over two numbers: add, subtract, multiply, divide.
pub struct CalculatorTool;

#[async_trait]
impl ToolHandler for CalculatorTool {
    fn name(&self) -> String {
        "calculate".to_string()
    }

    fn description(&self) -> String {
        "Performs basic arithmetic on two numbers".to_string()
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("operation", "string")
                .required()
                .with_choices([
                    json!("add"),
                    json!("subtract"),
                    json!("multiply"),
                    json!("divide"),
                ]),
            ParameterSpec::new("x", "number").required(),
            ParameterSpec::new("y", "number").required(),
        ]
    }

    async fn call(&self, params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("operation is required"))?;
        let x = params
            .get("x")
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::invalid_params("x must be a number"))?;
        let y = params
            .get("y")
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::invalid_params("y must be a number"))?;

        let result = match operation {
            "add" => x + y,
            "subtract" => x - y,
            "multiply" => x * y,
            "divide" => {
                if y == 0.0 {
                    return Err(HandlerError::message("Cannot divide by zero"));
                }
                x / y
            }
            other => {
                return Err(HandlerError::invalid_params(format!(
                    "unknown operation: {other}"
                )));
            }
        };
        Ok(number_value(result))
    }
}

/// Streaming counter: emits one progress notification per number counted.
pub struct CounterTool;

impl CounterTool {
    fn count_of(params: &Value) -> usize {
        params
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(3) as usize
    }

    fn delay_of(params: &Value) -> u64 {
        params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0)
    }

    /// Progress percentage after `step` of `total`, truncated to two
    /// decimals; exactly the integer 100 at completion.
    fn progress_after(step: usize, total: usize) -> Value {
        if step == total {
            json!(100)
        } else {
            json!((step * 10_000 / total) as f64 / 100.0)
        }
    }
}

#[async_trait]
impl ToolHandler for CounterTool {
    fn name(&self) -> String {
        "counter".to_string()
    }

    fn description(&self) -> String {
        "Counts upward, reporting progress".to_string()
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("count", "int").with_default(json!(3)),
            ParameterSpec::new("delay_ms", "int").with_default(json!(0)),
        ]
    }

    async fn call(&self, params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
        let count = Self::count_of(&params);
        let numbers: Vec<usize> = (1..=count).collect();
        Ok(json!({"numbers": numbers}))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn call_stream(
        &self,
        params: Value,
        _ctx: &RequestContext,
        progress: ProgressSink,
    ) -> HandlerResult<Value> {
        let count = Self::count_of(&params);
        let delay_ms = Self::delay_of(&params);

        let mut numbers = Vec::with_capacity(count);
        for step in 1..=count {
            if delay_ms > 0 {
                sleep(Duration::from_millis(delay_ms)).await;
            }
            numbers.push(step);
            progress
                .emit(json!({
                    "status": "in_progress",
                    "progress": Self::progress_after(step, count),
                    "numbers": numbers,
                }))
                .map_err(|_| HandlerError::internal("client disconnected"))?;
        }
        Ok(json!({"numbers": numbers}))
    }
}

/// Readme resource whose content depends on a `version` parameter.
pub struct VersionedReadme;

#[async_trait]
impl ResourceHandler for VersionedReadme {
    fn uri(&self) -> String {
        "docs://readme".to_string()
    }

    fn name(&self) -> String {
        "readme".to_string()
    }

    fn description(&self) -> String {
        "Project readme, versioned".to_string()
    }

    fn mime_type(&self) -> String {
        "text/markdown".to_string()
    }

    async fn read(&self, params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
        let version = params
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("1.0");
        Ok(json!(format!(
            "# Version {version}\nThis is the readme for version {version}."
        )))
    }
}

/// Prompt that greets a person by name.
pub struct GreetingPrompt;

#[async_trait]
impl PromptHandler for GreetingPrompt {
    fn name(&self) -> String {
        "greeting".to_string()
    }

    fn description(&self) -> String {
        "Greets a person by name".to_string()
    }

    fn arguments(&self) -> Vec<PromptArgument> {
        vec![
            PromptArgument::new("name")
                .with_description("Who to greet")
                .required(),
        ]
    }

    async fn get(&self, args: Value, _ctx: &RequestContext) -> HandlerResult<PromptBody> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("name is required"))?;
        Ok(PromptBody::new()
            .with_title("Greeting")
            .with_message(PromptMessage::system("You are brief and warm."))
            .with_message(PromptMessage::user(format!("Say hello to {name}."))))
    }
}
