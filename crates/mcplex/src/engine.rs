//! JSON-RPC request engine.
//!
//! The engine validates inbound envelopes, enforces the
//! initialize-before-use gate, routes methods to registry-resolved
//! handlers, and orchestrates streaming tool executions. One engine serves
//! all connections; per-connection state (the initialize gate and the
//! client-capabilities snapshot) is keyed by client id, while the registry
//! and configuration are shared.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
    config::ServerConfig,
    context::{RequestContext, RequestIdGenerator},
    error::{Error, Result},
    handler::{HandlerError, HandlerResult, ProgressSink},
    registry::Registry,
    schema::{
        ClientCapabilities, ErrorResponse, INTERNAL_ERROR, InitializeResult, Message, Response,
        RequestId, ResourceReadResult,
    },
};

/// What the engine hands back to the transport for one inbound message.
#[derive(Debug)]
pub enum EngineReply {
    /// A single message to deliver to the client.
    Message(Message),
    /// A streaming execution was accepted; the started/progress/terminal
    /// messages flow through the connection handle.
    Streaming,
    /// The message was a notification; nothing to deliver.
    None,
}

/// Parameters of a capability invocation: `{id, params}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityCall {
    /// Identifier of the target capability (tool name, resource URI, or
    /// prompt name).
    pub id: String,
    /// Parameters forwarded to the handler.
    #[serde(default)]
    pub params: Value,
}

/// What an override callback decided.
pub enum OverrideReply {
    /// Fall through to the engine default.
    Default,
    /// Immediate reply with this result value.
    Reply(Value),
    /// Run a streaming execution with this body.
    Stream(StreamFn),
}

/// Streaming body supplied by an override callback.
pub type StreamFn = Box<
    dyn FnOnce(Value, RequestContext, ProgressSink) -> BoxFuture<'static, HandlerResult<Value>>
        + Send,
>;

/// Optional user hook whose callbacks pre-empt the engine defaults.
///
/// The engine serializes all callback invocations, so implementations may
/// keep mutable state without external locking.
#[async_trait]
pub trait ServerOverride: Send + Sync {
    /// Override the `initialize` result.
    async fn initialize(
        &mut self,
        _params: Value,
        _ctx: &RequestContext,
    ) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }

    /// Override `tools/list`.
    async fn list_tools(&mut self, _ctx: &RequestContext) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }

    /// Override `tools/execute`.
    async fn execute_tool(
        &mut self,
        _call: &CapabilityCall,
        _ctx: &RequestContext,
    ) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }

    /// Override `resources/list`.
    async fn list_resources(&mut self, _ctx: &RequestContext) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }

    /// Override `resources/get`.
    async fn get_resource(
        &mut self,
        _call: &CapabilityCall,
        _ctx: &RequestContext,
    ) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }

    /// Override `prompts/list`.
    async fn list_prompts(&mut self, _ctx: &RequestContext) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }

    /// Override `prompts/get`.
    async fn get_prompt(
        &mut self,
        _call: &CapabilityCall,
        _ctx: &RequestContext,
    ) -> Result<OverrideReply> {
        Ok(OverrideReply::Default)
    }
}

#[derive(Debug, Clone, Default)]
struct ClientSession {
    initialized: bool,
    capabilities: ClientCapabilities,
}

enum DispatchOutcome {
    Value(Value),
    Streaming,
}

/// Central dispatcher for one server instance.
pub struct RequestEngine {
    config: ServerConfig,
    registry: Registry,
    hook: Option<Mutex<Box<dyn ServerOverride>>>,
    sessions: DashMap<String, ClientSession>,
    client_ids: RequestIdGenerator,
}

impl RequestEngine {
    /// Create an engine over a registry.
    pub fn new(config: ServerConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            hook: None,
            sessions: DashMap::new(),
            client_ids: RequestIdGenerator::new("client"),
        }
    }

    /// Attach a user override hook.
    pub fn with_override(mut self, hook: Box<dyn ServerOverride>) -> Self {
        self.hook = Some(Mutex::new(hook));
        self
    }

    /// The registry served by this engine.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The engine configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether a client has completed the initialize handshake.
    pub fn is_initialized(&self, client_id: &str) -> bool {
        self.sessions
            .get(client_id)
            .map(|session| session.initialized)
            .unwrap_or(false)
    }

    /// Drop the session state for a disconnected client.
    pub fn evict_session(&self, client_id: &str) {
        self.sessions.remove(client_id);
    }

    /// Generate a process-unique client id for transports whose clients
    /// did not supply one.
    pub fn next_client_id(&self) -> String {
        self.client_ids.next_id()
    }

    /// Process one decoded inbound envelope.
    ///
    /// The context carries the connection handle, client id, and the
    /// streaming flag set by the transport. Responses are returned to the
    /// caller; streaming traffic flows through the connection handle.
    pub async fn process_request(&self, message: Value, ctx: &RequestContext) -> EngineReply {
        let Some(envelope) = message.as_object() else {
            return EngineReply::Message(Message::Error(ErrorResponse::new(
                None,
                crate::schema::INVALID_REQUEST,
                "Invalid request: not a JSON object",
            )));
        };

        let id = RequestId::from_value(envelope.get("id"));

        let Some(method) = envelope.get("method").and_then(Value::as_str) else {
            return EngineReply::Message(Message::Error(ErrorResponse::new(
                None,
                crate::schema::INVALID_REQUEST,
                "Invalid request: missing method",
            )));
        };
        let method = method.strip_prefix("mcp/").unwrap_or(method).to_string();

        let params = envelope
            .get("params")
            .cloned()
            .unwrap_or(Value::Null);

        // A message without an id is a notification: no response, ever.
        let Some(id) = id else {
            debug!(client_id = ctx.client_id(), %method, "ignoring notification");
            return EngineReply::None;
        };

        if method != "initialize" && !self.is_initialized(ctx.client_id()) {
            return EngineReply::Message(Message::Error(
                Error::NotInitialized
                    .to_jsonrpc_response(Some(id))
                    .unwrap_or_else(|| {
                        ErrorResponse::new(None, INTERNAL_ERROR, "Server not initialized")
                    }),
            ));
        }

        let ctx = self.request_scope(ctx, &id);
        let outcome = self.dispatch(&method, &id, params, &ctx).await;
        match outcome {
            Ok(DispatchOutcome::Value(value)) => {
                EngineReply::Message(Message::Response(Response::new(id, value)))
            }
            Ok(DispatchOutcome::Streaming) => EngineReply::Streaming,
            Err(err) => EngineReply::Message(Message::Error(error_response(Some(id), err))),
        }
    }

    /// Derive a request-scoped context carrying the id and the client's
    /// capability snapshot.
    fn request_scope(&self, ctx: &RequestContext, id: &RequestId) -> RequestContext {
        let ctx = ctx.with_request_id(id.clone());
        match self.sessions.get(ctx.client_id()) {
            Some(session) => ctx.with_client_capabilities(session.capabilities.clone()),
            None => ctx,
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        id: &RequestId,
        params: Value,
        ctx: &RequestContext,
    ) -> Result<DispatchOutcome> {
        match method {
            "initialize" => self.initialize(params, ctx).await,
            "tools/list" => self.list_tools(ctx).await,
            "tools/execute" => self.execute_tool(id, params, ctx).await,
            "resources/list" => self.list_resources(ctx).await,
            "resources/get" => self.get_resource(params, ctx).await,
            "prompts/list" => self.list_prompts(ctx).await,
            "prompts/get" => self.get_prompt(params, ctx).await,
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    async fn initialize(&self, params: Value, ctx: &RequestContext) -> Result<DispatchOutcome> {
        let capabilities: ClientCapabilities = params
            .get("capabilities")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        self.sessions.insert(
            ctx.client_id().to_string(),
            ClientSession {
                initialized: true,
                capabilities,
            },
        );
        info!(client_id = ctx.client_id(), "client initialized");

        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            if let OverrideReply::Reply(value) = hook.initialize(params, ctx).await? {
                return Ok(DispatchOutcome::Value(value));
            }
        }

        let result = InitializeResult::new(&self.config.display_name, &self.config.version);
        Ok(DispatchOutcome::Value(serde_json::to_value(result)?))
    }

    async fn list_tools(&self, ctx: &RequestContext) -> Result<DispatchOutcome> {
        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            if let OverrideReply::Reply(value) = hook.list_tools(ctx).await? {
                return Ok(DispatchOutcome::Value(value));
            }
        }
        let descriptors: Vec<_> = self
            .registry
            .tools()
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect();
        Ok(DispatchOutcome::Value(json!({ "tools": descriptors })))
    }

    async fn list_resources(&self, ctx: &RequestContext) -> Result<DispatchOutcome> {
        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            if let OverrideReply::Reply(value) = hook.list_resources(ctx).await? {
                return Ok(DispatchOutcome::Value(value));
            }
        }
        let descriptors: Vec<_> = self
            .registry
            .resources()
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect();
        Ok(DispatchOutcome::Value(json!({ "resources": descriptors })))
    }

    async fn list_prompts(&self, ctx: &RequestContext) -> Result<DispatchOutcome> {
        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            if let OverrideReply::Reply(value) = hook.list_prompts(ctx).await? {
                return Ok(DispatchOutcome::Value(value));
            }
        }
        let descriptors: Vec<_> = self
            .registry
            .prompts()
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect();
        Ok(DispatchOutcome::Value(json!({ "prompts": descriptors })))
    }

    async fn execute_tool(
        &self,
        id: &RequestId,
        params: Value,
        ctx: &RequestContext,
    ) -> Result<DispatchOutcome> {
        let call = parse_call(params, "tools/execute")?;

        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            match hook.execute_tool(&call, ctx).await? {
                OverrideReply::Default => {}
                OverrideReply::Reply(value) => return Ok(DispatchOutcome::Value(value)),
                OverrideReply::Stream(run) => {
                    return self.run_override_stream(id, call, ctx, run).await;
                }
            }
        }

        let Some(entry) = self.registry.tool(&call.id) else {
            return Err(Error::ToolNotFound(call.id));
        };

        if ctx.streaming() && entry.handler.supports_streaming() {
            let handler = entry.handler.clone();
            let params = call.params;
            let label = call.id;
            self.spawn_streaming(id.clone(), ctx, label, move |ctx, sink| {
                Box::pin(async move { handler.call_stream(params, &ctx, sink).await })
            });
            return Ok(DispatchOutcome::Streaming);
        }

        let handler = entry.handler.clone();
        let params = call.params;
        let scoped = ctx.clone();
        let value = trap_handler(
            tokio::spawn(async move { handler.call(params, &scoped).await }),
            &call.id,
        )
        .await?;
        Ok(DispatchOutcome::Value(value))
    }

    /// Run an override-supplied streaming body, degrading to a plain reply
    /// when the transport cannot stream.
    async fn run_override_stream(
        &self,
        id: &RequestId,
        call: CapabilityCall,
        ctx: &RequestContext,
        run: StreamFn,
    ) -> Result<DispatchOutcome> {
        if ctx.streaming() {
            let params = call.params;
            self.spawn_streaming(id.clone(), ctx, call.id, move |ctx, sink| {
                run(params, ctx, sink)
            });
            return Ok(DispatchOutcome::Streaming);
        }
        let label = call.id.clone();
        let scoped = ctx.clone();
        let value = trap_handler(
            tokio::spawn(run(call.params, scoped, ProgressSink::disabled())),
            &label,
        )
        .await?;
        Ok(DispatchOutcome::Value(value))
    }

    async fn get_resource(&self, params: Value, ctx: &RequestContext) -> Result<DispatchOutcome> {
        let call = parse_call(params, "resources/get")?;

        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            if let OverrideReply::Reply(value) = hook.get_resource(&call, ctx).await? {
                return Ok(DispatchOutcome::Value(value));
            }
        }

        let Some(entry) = self.registry.resource(&call.id) else {
            return Err(Error::ResourceNotFound { uri: call.id });
        };
        let handler = entry.handler.clone();
        let params = call.params;
        let scoped = ctx.clone();
        let content = trap_handler(
            tokio::spawn(async move { handler.read(params, &scoped).await }),
            &call.id,
        )
        .await?;
        let result = ResourceReadResult::new(entry.descriptor, content);
        Ok(DispatchOutcome::Value(serde_json::to_value(result)?))
    }

    async fn get_prompt(&self, params: Value, ctx: &RequestContext) -> Result<DispatchOutcome> {
        let call = parse_call(params, "prompts/get")?;

        if let Some(hook) = &self.hook {
            let mut hook = hook.lock().await;
            if let OverrideReply::Reply(value) = hook.get_prompt(&call, ctx).await? {
                return Ok(DispatchOutcome::Value(value));
            }
        }

        let Some(entry) = self.registry.prompt(&call.id) else {
            return Err(Error::PromptNotFound(call.id));
        };
        let handler = entry.handler.clone();
        let params = call.params;
        let scoped = ctx.clone();
        let body = trap_handler(
            tokio::spawn(async move { handler.get(params, &scoped).await }),
            &call.id,
        )
        .await?;
        Ok(DispatchOutcome::Value(serde_json::to_value(body)?))
    }

    /// Spawn a streaming emitter task for one invocation.
    ///
    /// The `streaming_started` response is enqueued on the connection's
    /// FIFO channel before the task starts, so the client observes
    /// ⟨started, progress*, terminal⟩ in order. The task writes through
    /// the connection handle captured from the context; once the client is
    /// evicted every send fails and the task winds down.
    fn spawn_streaming<F>(&self, id: RequestId, ctx: &RequestContext, label: String, run: F)
    where
        F: FnOnce(RequestContext, ProgressSink) -> BoxFuture<'static, HandlerResult<Value>>
            + Send
            + 'static,
    {
        let connection = ctx.connection().clone();
        let started = Message::Response(Response::new(
            id.clone(),
            json!({"status": "streaming_started"}),
        ));
        if connection.send(started).is_err() {
            debug!(client_id = ctx.client_id(), "client gone before streaming started");
            return;
        }

        let sink = ProgressSink::new(connection.clone());
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let task = tokio::spawn(run(ctx, sink));
            let terminal = match task.await {
                Ok(Ok(value)) => Message::Response(Response::new(
                    id,
                    json!({"status": "complete", "data": value}),
                )),
                Ok(Err(failure)) => {
                    Message::Error(error_response(Some(id), handler_failure(failure, &label)))
                }
                Err(join_error) => {
                    error!(%label, %join_error, "streaming handler crashed");
                    Message::Error(ErrorResponse::new(
                        Some(id),
                        INTERNAL_ERROR,
                        "Internal error: handler crashed",
                    ))
                }
            };
            if connection.send(terminal).is_err() {
                debug!("client disconnected before streaming completed");
            }
        });
    }
}

/// Parse `{id, params}` invocation parameters.
fn parse_call(params: Value, method: &str) -> Result<CapabilityCall> {
    serde_json::from_value(params)
        .map_err(|_| Error::InvalidParams(format!("{method} requires an `id`")))
}

/// Await a spawned handler task, converting failures and panics.
async fn trap_handler<T>(
    task: tokio::task::JoinHandle<HandlerResult<T>>,
    label: &str,
) -> Result<T> {
    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(failure)) => Err(handler_failure(failure, label)),
        Err(join_error) => {
            error!(%label, %join_error, "handler crashed");
            Err(Error::InternalError("handler crashed".to_string()))
        }
    }
}

/// Map a handler failure onto the crate error type.
fn handler_failure(failure: HandlerError, label: &str) -> Error {
    match failure {
        HandlerError::NotFound => Error::InvalidParams(format!("not found: {label}")),
        HandlerError::InvalidParams(message) => Error::InvalidParams(message),
        failure => Error::Handler(failure.to_string()),
    }
}

/// Build an error response, falling back to the generic internal code.
pub(crate) fn error_response(id: Option<RequestId>, err: Error) -> ErrorResponse {
    err.to_jsonrpc_response(id.clone())
        .unwrap_or_else(|| ErrorResponse::new(id, INTERNAL_ERROR, err.to_string()))
}
