//! Capability contracts for tools, resources, and prompts.
//!
//! Implementers provide the operation; identity and schema members have
//! defaults derived from the implementing type name. Handlers receive all
//! necessary data through `(params, ctx)` and must not reach into engine
//! internals.

use std::result::Result as StdResult;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{
    context::RequestContext,
    error::Result,
    schema::{Message, Notification, ParameterSpec, PromptArgument, PromptBody},
    transport::ConnectionHandle,
};

/// Failure signalled by a capability handler.
///
/// The engine translates these into JSON-RPC error objects: lookups and
/// parameter failures become `-32602`, everything else `-32603` with the
/// handler-supplied message.
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,

    /// The supplied parameters are invalid.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The handler failed internally.
    #[error("internal error: {0}")]
    Internal(String),

    /// A failure with a caller-facing message, passed through verbatim.
    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    /// Create an invalid-parameters failure.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// Create an internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a failure whose message is surfaced to the caller verbatim.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Result alias for handler operations.
pub type HandlerResult<T> = StdResult<T, HandlerError>;

/// Emit handle given to streaming tool invocations.
///
/// Each `emit` sends one `progress` notification through the connection
/// handle captured from the request context. After the client disconnects,
/// emits fail with `ConnectionClosed` and the task is expected to return.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    connection: Option<ConnectionHandle>,
}

impl ProgressSink {
    /// Create a sink that writes to the given connection.
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// Create a sink that drops every emission.
    ///
    /// Used when a streaming-capable handler runs under a transport that
    /// cannot deliver progress notifications.
    pub fn disabled() -> Self {
        Self { connection: None }
    }

    /// Send one progress notification.
    pub fn emit(&self, progress: Value) -> Result<()> {
        match &self.connection {
            Some(connection) => {
                connection.send(Message::Notification(Notification::progress(progress)))
            }
            None => Ok(()),
        }
    }
}

/// An executable function exposed to clients, identified by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool name; also the lookup id for `tools/execute`.
    fn name(&self) -> String {
        derived_identifier(std::any::type_name::<Self>())
    }

    /// Human-readable description.
    fn description(&self) -> String {
        format!("Tool implemented by {}", short_type_name::<Self>())
    }

    /// Ordered parameter declarations.
    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// Execute the tool and return its result value.
    async fn call(&self, params: Value, ctx: &RequestContext) -> HandlerResult<Value>;

    /// Whether the tool implements [`call_stream`](Self::call_stream).
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Execute the tool, emitting progress notifications along the way.
    async fn call_stream(
        &self,
        _params: Value,
        _ctx: &RequestContext,
        _progress: ProgressSink,
    ) -> HandlerResult<Value> {
        Err(HandlerError::internal("streaming not supported"))
    }
}

/// Addressable readable content, identified by a scheme-qualified URI.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource URI; also the lookup id for `resources/get`.
    fn uri(&self) -> String;

    /// Short display name.
    fn name(&self) -> String {
        derived_identifier(std::any::type_name::<Self>())
    }

    /// Human-readable description.
    fn description(&self) -> String {
        format!("Resource implemented by {}", short_type_name::<Self>())
    }

    /// MIME type of the content.
    fn mime_type(&self) -> String {
        "text/plain".to_string()
    }

    /// Read the resource content.
    async fn read(&self, params: Value, ctx: &RequestContext) -> HandlerResult<Value>;
}

/// A templated message set, identified by name.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Prompt name; also the lookup id for `prompts/get`.
    fn name(&self) -> String {
        derived_identifier(std::any::type_name::<Self>())
    }

    /// Human-readable description.
    fn description(&self) -> String {
        format!("Prompt implemented by {}", short_type_name::<Self>())
    }

    /// Ordered argument declarations.
    fn arguments(&self) -> Vec<PromptArgument> {
        Vec::new()
    }

    /// Materialize the prompt with the given arguments.
    async fn get(&self, args: Value, ctx: &RequestContext) -> HandlerResult<PromptBody>;
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.rsplit("::").next().unwrap_or(full);
    base.split('<').next().unwrap_or(base)
}

/// Derive a kebab-case identifier from a Rust type path.
pub(crate) fn derived_identifier(type_name: &str) -> String {
    let base = type_name.rsplit("::").next().unwrap_or(type_name);
    let base = base.split('<').next().unwrap_or(base);
    let mut out = String::with_capacity(base.len() + 4);
    for (i, ch) in base.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '_' {
            out.push('-');
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::transport::ConnectionHandle;

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
            Ok(params)
        }
    }

    struct ReadmeResource;

    #[async_trait]
    impl ResourceHandler for ReadmeResource {
        fn uri(&self) -> String {
            "docs://readme".to_string()
        }

        async fn read(&self, _params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
            Ok(json!("# Readme"))
        }
    }

    #[test]
    fn test_derived_identifier() {
        assert_eq!(derived_identifier("my_crate::tools::EchoTool"), "echo-tool");
        assert_eq!(derived_identifier("Calculator"), "calculator");
        assert_eq!(derived_identifier("snake_case_unit"), "snake-case-unit");
    }

    #[test]
    fn test_tool_defaults() {
        let tool = EchoTool;
        assert_eq!(tool.name(), "echo-tool");
        assert_eq!(tool.description(), "Tool implemented by EchoTool");
        assert!(tool.parameters().is_empty());
        assert!(!tool.supports_streaming());
    }

    #[test]
    fn test_resource_defaults() {
        let resource = ReadmeResource;
        assert_eq!(resource.uri(), "docs://readme");
        assert_eq!(resource.name(), "readme-resource");
        assert_eq!(resource.mime_type(), "text/plain");
    }

    #[tokio::test]
    async fn test_default_call_stream_rejects() {
        let tool = EchoTool;
        let (handle, _rx) = ConnectionHandle::channel("c1");
        let ctx = crate::context::RequestContext::builder(handle).build();
        let result = tool
            .call_stream(json!({}), &ctx, ProgressSink::disabled())
            .await;
        assert!(matches!(result, Err(HandlerError::Internal(_))));
    }

    #[test]
    fn test_progress_sink_emits_notification() {
        let (handle, mut rx) = ConnectionHandle::channel("c1");
        let sink = ProgressSink::new(handle);
        sink.emit(json!({"progress": 50})).unwrap();

        match rx.try_recv().unwrap() {
            Message::Notification(notification) => {
                assert_eq!(notification.method, "progress");
                assert_eq!(notification.params.unwrap()["progress"], json!(50));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_sink_is_noop() {
        let sink = ProgressSink::disabled();
        assert!(sink.emit(json!({})).is_ok());
    }
}
