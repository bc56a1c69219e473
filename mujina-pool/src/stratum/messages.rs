//! JSON-RPC envelope shared by both stratum dialects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC message envelope.
///
/// Pools use a loose JSON-RPC format where messages can be:
/// - Requests (have method and params, may have id)
/// - Responses (have id and result or error)
/// - Notifications (have method and params, no id)
///
/// Some pools tag messages with `"jsonrpc": "2.0"`, most don't; unknown
/// members are ignored either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request or notification from client or server
    Request {
        /// Message ID (absent or null for notifications)
        #[serde(default)]
        id: Option<u64>,
        /// Method name (e.g., "login", "job", "mining.notify")
        method: String,
        /// Method parameters, an object or an array depending on dialect
        #[serde(default)]
        params: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jsonrpc: Option<String>,
    },

    /// Response to a request
    Response {
        /// Message ID matching the request
        id: u64,
        /// Result value (present on success)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error value (present on failure)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl JsonRpcMessage {
    /// Create a new request message.
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id: Some(id),
            method: method.into(),
            params,
            jsonrpc: None,
        }
    }

    /// Create a request tagged `"jsonrpc": "2.0"`, as the default dialect
    /// expects.
    pub fn request_v2(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id: Some(id),
            method: method.into(),
            params,
            jsonrpc: Some("2.0".to_string()),
        }
    }

    /// Get the message ID if present.
    pub fn id(&self) -> Option<u64> {
        match self {
            JsonRpcMessage::Request { id, .. } => *id,
            JsonRpcMessage::Response { id, .. } => Some(*id),
        }
    }

    /// Get the method name for requests.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request { method, .. } => Some(method),
            JsonRpcMessage::Response { .. } => None,
        }
    }

    /// Serialize as one wire line. The link's codec adds the terminator.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Human-readable text of an error member.
///
/// The default dialect sends `{"code": -1, "message": "..."}`, the Eth
/// dialect `[code, "message", data]` or a bare string.
pub fn error_text(error: &Value) -> String {
    match error {
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::Array(items) => items
            .iter()
            .find_map(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `error` member that is present and not null.
pub fn real_error(error: &Option<Value>) -> Option<&Value> {
    error.as_ref().filter(|e| !e.is_null())
}
