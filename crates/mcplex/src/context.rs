//! Per-request context and identifier generation.
//!
//! A [`RequestContext`] is built by the transport when a message arrives and
//! carries everything a handler may need: the connection's outbound handle,
//! the request id, a snapshot of the client's capabilities, the streaming
//! flag, and an open-ended custom-data map. Contexts are immutable; derived
//! contexts are created with the `with_*` methods, and streaming writes flow
//! through the connection handle rather than by mutating the context.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde_json::Value;

use crate::{
    schema::{ClientCapabilities, RequestId},
    transport::ConnectionHandle,
};

/// Immutable per-request value bundle passed to handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    connection: ConnectionHandle,
    request_id: Option<RequestId>,
    client_id: String,
    capabilities: ClientCapabilities,
    streaming: bool,
    data: HashMap<String, Value>,
}

impl RequestContext {
    /// Start building a context for the given connection.
    pub fn builder(connection: ConnectionHandle) -> ContextBuilder {
        let client_id = connection.client_id().to_string();
        ContextBuilder {
            connection,
            request_id: None,
            client_id,
            capabilities: ClientCapabilities::default(),
            streaming: false,
            data: HashMap::new(),
        }
    }

    /// The outbound handle for this connection.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.inner.connection
    }

    /// The JSON-RPC id of the request being served, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.inner.request_id.as_ref()
    }

    /// The stable client identifier.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Snapshot of the capabilities the client reported at initialize.
    pub fn client_capabilities(&self) -> &ClientCapabilities {
        &self.inner.capabilities
    }

    /// Whether the transport can deliver progress notifications for this
    /// request.
    pub fn streaming(&self) -> bool {
        self.inner.streaming
    }

    /// Read a custom-data entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.data.get(key)
    }

    /// Read a custom-data entry, falling back to a default.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.inner.data.get(key).cloned().unwrap_or(default)
    }

    /// Derive a context with an additional custom-data entry.
    pub fn with_value(&self, key: impl Into<String>, value: Value) -> Self {
        let mut data = self.inner.data.clone();
        data.insert(key.into(), value);
        self.derive(|inner| inner.data = data)
    }

    /// Derive a context bound to a specific request id.
    pub fn with_request_id(&self, request_id: RequestId) -> Self {
        self.derive(|inner| inner.request_id = Some(request_id))
    }

    /// Derive a context carrying a client-capabilities snapshot.
    pub fn with_client_capabilities(&self, capabilities: ClientCapabilities) -> Self {
        self.derive(|inner| inner.capabilities = capabilities)
    }

    fn derive(&self, apply: impl FnOnce(&mut ContextInner)) -> Self {
        let mut inner = ContextInner {
            connection: self.inner.connection.clone(),
            request_id: self.inner.request_id.clone(),
            client_id: self.inner.client_id.clone(),
            capabilities: self.inner.capabilities.clone(),
            streaming: self.inner.streaming,
            data: self.inner.data.clone(),
        };
        apply(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}

/// Builder for [`RequestContext`].
#[derive(Debug)]
pub struct ContextBuilder {
    connection: ConnectionHandle,
    request_id: Option<RequestId>,
    client_id: String,
    capabilities: ClientCapabilities,
    streaming: bool,
    data: HashMap<String, Value>,
}

impl ContextBuilder {
    /// Bind the request id.
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Override the client id (defaults to the connection's).
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Attach a client-capabilities snapshot.
    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Mark the request as stream-capable.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Seed a custom-data entry.
    pub fn value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Finish building the context.
    pub fn build(self) -> RequestContext {
        RequestContext {
            inner: Arc::new(ContextInner {
                connection: self.connection,
                request_id: self.request_id,
                client_id: self.client_id,
                capabilities: self.capabilities,
                streaming: self.streaming,
                data: self.data,
            }),
        }
    }
}

/// Generator for strings unique within the server process lifetime.
///
/// Used for generated client ids and server-originated message ids; inbound
/// messages without an id are notifications and never have an id fabricated
/// for them.
#[derive(Debug)]
pub struct RequestIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a generator with the given id prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next unique id.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new("srv")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::transport::ConnectionHandle;

    use super::*;

    fn test_context() -> RequestContext {
        let (handle, _rx) = ConnectionHandle::channel("c1");
        RequestContext::builder(handle).build()
    }

    #[test]
    fn test_defaults() {
        let ctx = test_context();
        assert_eq!(ctx.client_id(), "c1");
        assert!(ctx.request_id().is_none());
        assert!(!ctx.streaming());
        assert!(ctx.client_capabilities().is_empty());
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn test_with_value_derives_without_mutating() {
        let ctx = test_context();
        let derived = ctx.with_value("tenant", json!("acme"));

        assert!(ctx.get("tenant").is_none());
        assert_eq!(derived.get("tenant"), Some(&json!("acme")));
        assert_eq!(derived.get_or("missing", json!(0)), json!(0));
    }

    #[test]
    fn test_with_request_id_preserves_data() {
        let (handle, _rx) = ConnectionHandle::channel("c2");
        let ctx = RequestContext::builder(handle)
            .streaming(true)
            .value("k", json!(1))
            .build();
        let derived = ctx.with_request_id(RequestId::from("9"));

        assert_eq!(derived.request_id(), Some(&RequestId::from("9")));
        assert!(derived.streaming());
        assert_eq!(derived.get("k"), Some(&json!(1)));
    }

    #[test]
    fn test_id_generator_monotonic_unique() {
        let generator = RequestIdGenerator::new("req");
        let first = generator.next_id();
        let second = generator.next_id();
        assert_eq!(first, "req-1");
        assert_eq!(second, "req-2");
        assert_ne!(first, second);
    }
}
