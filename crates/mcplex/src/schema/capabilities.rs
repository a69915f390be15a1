//! Capability advertisement types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PROTOCOL_VERSION;

/// Capabilities reported by a client during `initialize`.
///
/// The engine stores these opaquely and snapshots them into every request
/// context; handlers interpret the entries they care about.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    #[serde(flatten)]
    pub entries: HashMap<String, Value>,
}

impl ClientCapabilities {
    /// Look up a capability entry by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether the client reported any capabilities at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single advertised server operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCapability {
    /// Whether the operation serves live registry state.
    pub dynamic: bool,
}

impl OperationCapability {
    /// An operation backed by the live registry.
    pub fn dynamic() -> Self {
        Self { dynamic: true }
    }
}

/// Capabilities advertised by the server in the `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub resources: HashMap<String, OperationCapability>,
    pub prompts: HashMap<String, OperationCapability>,
    pub tools: HashMap<String, OperationCapability>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        let operations = |names: &[&str]| {
            names
                .iter()
                .map(|name| (name.to_string(), OperationCapability::dynamic()))
                .collect()
        };
        Self {
            resources: operations(&["listResources", "getResource"]),
            prompts: operations(&["listPrompts", "getPrompt"]),
            tools: operations(&["listTools", "executeTool"]),
        }
    }
}

/// Identity of the server, reported in the `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    /// Create a new server identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// The server's response to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
}

impl InitializeResult {
    /// Create an initialize result with the fixed protocol version and
    /// default capability advertisement.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            server_info: ServerInfo::new(name, version),
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
        }
    }

    /// Replace the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}
