//! Resource descriptor types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource record as reported by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Lookup key for `resources/get`; equal to the resource URI.
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl ResourceDescriptor {
    /// Create a descriptor; the id mirrors the URI.
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: uri.into(),
            name: name.into(),
            description: String::new(),
            mime_type: "text/plain".to_string(),
        }
    }

    /// Set the resource description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// The result of `resources/get`: the descriptor plus the read content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadResult {
    #[serde(flatten)]
    pub descriptor: ResourceDescriptor,
    pub content: Value,
}

impl ResourceReadResult {
    /// Pair a descriptor with content returned by the handler.
    pub fn new(descriptor: ResourceDescriptor, content: Value) -> Self {
        Self {
            descriptor,
            content,
        }
    }
}
