use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

// Standard JSON-RPC error codes
/// JSON-RPC parse error code.
pub const PARSE_ERROR: i32 = -32700;
/// JSON-RPC invalid request error code.
pub const INVALID_REQUEST: i32 = -32600;
/// JSON-RPC method not found error code.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC invalid params error code.
pub const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC internal error code.
pub const INTERNAL_ERROR: i32 = -32603;

// Implementation-specific codes used at the server boundary
/// Error code returned for any method invoked before `initialize`.
pub const NOT_INITIALIZED: i32 = -32002;
/// Error code for authentication and media-type boundary failures.
pub const AUTH_ERROR: i32 = -32001;

/// Any valid JSON-RPC object that can be decoded off the wire or encoded to
/// be sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A request that expects a response.
    Request(Request),
    /// A notification which does not expect a response.
    Notification(Notification),
    /// A successful response to a request.
    Response(Response),
    /// An error response to a request.
    Error(ErrorResponse),
}

impl Message {
    /// Return the request id carried by this message, if any.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Response(response) => Some(&response.id),
            Self::Error(error) => error.id.as_ref(),
            Self::Notification(_) => None,
        }
    }
}

/// A uniquely identifying ID for a request in JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// String request ID.
    String(String),
    /// Numeric request ID.
    Number(i64),
}

impl RequestId {
    /// Normalize both string and numeric IDs into a consistent string format
    /// usable as a map key.
    pub fn to_key(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => format!("__num__{n}"),
        }
    }

    /// Extract a request id from the `id` member of a decoded envelope.
    ///
    /// `null`, absent, and non-string/non-integer ids all yield `None`; a
    /// message without an id is a notification.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        match value {
            Some(Value::String(s)) => Some(Self::String(s.clone())),
            Some(Value::Number(n)) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A request that expects a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A notification which does not expect a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Create a `progress` notification carrying the given payload.
    pub fn progress(params: Value) -> Self {
        Self::new("progress", Some(params))
    }
}

/// A successful (non-error) response to a request.
///
/// The result member carries the handler's value directly; tool executions
/// may return bare scalars, so no object wrapper is imposed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

impl Response {
    /// Create a new successful response.
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// A response to a request that indicates an error occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    /// Attach additional error data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.error.data = Some(data);
        self
    }
}

/// The error payload of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error type that occurred.
    pub code: i32,
    /// A short description of the error.
    pub message: String,
    /// Additional information about the error, defined by the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_round_trip() {
        let request = Request::new("1", "initialize", Some(json!({"capabilities": {}})));
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: Request = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.jsonrpc, JSONRPC_VERSION);
        assert_eq!(decoded.id, RequestId::String("1".to_string()));
        assert_eq!(decoded.method, "initialize");
    }

    #[test]
    fn test_message_decodes_request_and_notification() {
        let request: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(matches!(request, Message::Request(_)));

        let notification: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"progress","params":{}}"#).unwrap();
        assert!(matches!(notification, Message::Notification(_)));
    }

    #[test]
    fn test_null_id_decodes_as_notification() {
        let message: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"tools/list"}"#).unwrap();
        assert!(matches!(message, Message::Notification(_)));
    }

    #[test]
    fn test_error_response_serializes_null_id() {
        let error = ErrorResponse::new(None, PARSE_ERROR, "Parse error");
        let encoded = serde_json::to_value(&error).unwrap();
        assert_eq!(encoded["id"], Value::Null);
        assert_eq!(encoded["error"]["code"], json!(-32700));
    }

    #[test]
    fn test_request_id_from_value() {
        assert_eq!(
            RequestId::from_value(Some(&json!("abc"))),
            Some(RequestId::String("abc".to_string()))
        );
        assert_eq!(
            RequestId::from_value(Some(&json!(7))),
            Some(RequestId::Number(7))
        );
        assert_eq!(RequestId::from_value(Some(&Value::Null)), None);
        assert_eq!(RequestId::from_value(None), None);
    }

    #[test]
    fn test_request_id_keys_distinguish_kinds() {
        assert_ne!(
            RequestId::String("1".to_string()).to_key(),
            RequestId::Number(1).to_key()
        );
    }
}
