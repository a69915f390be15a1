//! Server configuration.

/// Immutable configuration for a server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported in the `initialize` result's `serverInfo`.
    pub display_name: String,
    /// Version reported in the `initialize` result's `serverInfo`.
    pub version: String,
    /// Default path prefix for component discovery.
    pub module_prefix: Option<String>,
    /// Path serving plain request/response JSON-RPC.
    pub mcp_path: String,
    /// Path serving NDJSON streaming JSON-RPC.
    pub stream_path: String,
    /// Path serving the SSE event stream.
    pub sse_path: String,
    /// Sibling path accepting JSON-RPC posts for SSE clients.
    pub sse_message_path: String,
}

impl ServerConfig {
    /// Create a configuration with the default HTTP paths.
    pub fn new(display_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            version: version.into(),
            module_prefix: None,
            mcp_path: "/mcp".to_string(),
            stream_path: "/mcp/stream".to_string(),
            sse_path: "/sse".to_string(),
            sse_message_path: "/sse/messages".to_string(),
        }
    }

    /// Set the discovery path prefix.
    pub fn with_module_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.module_prefix = Some(prefix.into());
        self
    }

    /// Override the plain JSON-RPC path.
    pub fn with_mcp_path(mut self, path: impl Into<String>) -> Self {
        self.mcp_path = path.into();
        self
    }

    /// Override the NDJSON streaming path.
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Override the SSE stream path.
    pub fn with_sse_path(mut self, path: impl Into<String>) -> Self {
        self.sse_path = path.into();
        self
    }

    /// Override the SSE inbound message path.
    pub fn with_sse_message_path(mut self, path: impl Into<String>) -> Self {
        self.sse_message_path = path.into();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("mcplex", env!("CARGO_PKG_VERSION"))
    }
}
