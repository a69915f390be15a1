use std::{io, result::Result as StdResult};

use thiserror::Error;

use crate::schema::{
    AUTH_ERROR, ErrorResponse, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, NOT_INITIALIZED,
    PARSE_ERROR, RequestId,
};

/// Error type for MCP server operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error with a message.
    #[error("IO error: {message}")]
    Io {
        /// Error message details.
        message: String,
    },

    /// JSON serialization or parsing error.
    #[error("Parse error: {message}")]
    JsonParse {
        /// Error message details.
        message: String,
    },

    /// Transport-layer error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid request error.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Method not found error.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters error.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Failure reported by a capability handler; the message is surfaced
    /// to the caller verbatim under the internal-error code.
    #[error("{0}")]
    Handler(String),

    /// A method other than initialize was called before initialization.
    #[error("Server not initialized")]
    NotInitialized,

    /// Tool lookup failed.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Resource lookup failed.
    #[error("Resource not found: {uri}")]
    ResourceNotFound {
        /// Missing resource URI.
        uri: String,
    },

    /// Prompt lookup failed.
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// A registered module does not satisfy the tool contract.
    #[error("Invalid tool registration: {0}")]
    InvalidTool(String),

    /// A registered module does not satisfy the resource contract.
    #[error("Invalid resource registration: {0}")]
    InvalidResource(String),

    /// A registered module does not satisfy the prompt contract.
    #[error("Invalid prompt registration: {0}")]
    InvalidPrompt(String),

    /// The transport cannot deliver to all clients.
    #[error("Broadcast not supported by this transport")]
    BroadcastUnsupported,

    /// Invalid configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Authentication or media-type boundary failure.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl Error {
    /// Convert this error to a specific JSON-RPC error response, if it maps
    /// onto a protocol-level code.
    ///
    /// Returns `None` for errors that should use the generic `-32603`
    /// internal-error handling at the call site.
    pub(crate) fn to_jsonrpc_response(&self, id: Option<RequestId>) -> Option<ErrorResponse> {
        let (code, message) = match self {
            Self::NotInitialized => (NOT_INITIALIZED, self.to_string()),
            Self::MethodNotFound(_) => (METHOD_NOT_FOUND, self.to_string()),
            Self::InvalidParams(_) => (INVALID_PARAMS, self.to_string()),
            Self::ToolNotFound(_) | Self::ResourceNotFound { .. } | Self::PromptNotFound(_) => {
                (INVALID_PARAMS, self.to_string())
            }
            Self::InvalidRequest(_) => (INVALID_REQUEST, self.to_string()),
            Self::JsonParse { .. } => (PARSE_ERROR, self.to_string()),
            Self::Unauthorized(_) => (AUTH_ERROR, self.to_string()),
            _ => return None,
        };

        Some(ErrorResponse::new(id, code, message))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
        }
    }
}

/// Result alias using the crate error type.
pub type Result<T> = StdResult<T, Error>;
