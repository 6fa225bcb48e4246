use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Result(JsonRpcResult),
    Error(JsonRpcErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResult {
    pub jsonrpc: String,
    pub id: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub error: JsonRpcError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResult {
    pub fn new(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<Value>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcError {
                code,
                message: message.into(),
                data,
            },
        }
    }
}

pub const ERROR_PARSE: i64 = -32700;
pub const ERROR_INVALID_REQUEST: i64 = -32600;
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERROR_INVALID_PARAMS: i64 = -32602;
pub const ERROR_INTERNAL: i64 = -32603;

pub fn method_not_found(id: Option<Value>, method: &str) -> JsonRpcResponse {
    JsonRpcResponse::Error(JsonRpcErrorResponse::new(
        id,
        ERROR_METHOD_NOT_FOUND,
        format!("method '{method}' not found"),
        None,
    ))
}

pub fn invalid_params(id: Option<Value>, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse::Error(JsonRpcErrorResponse::new(
        id,
        ERROR_INVALID_PARAMS,
        message,
        None,
    ))
}

pub fn internal_error(id: Option<Value>, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse::Error(JsonRpcErrorResponse::new(id, ERROR_INTERNAL, message, None))
}

/// MCP tool results wrap plain text in a one-element content list.
pub fn text_result(text: impl Into<String>) -> Value {
    serde_json::json!({
        "content": [{"type": "text", "text": text.into()}]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_id_is_notification() {
        let request: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .expect("parse");
        assert!(request.is_notification());
    }

    #[test]
    fn result_serializes_with_version() {
        let result = JsonRpcResult::new(Value::from(1), serde_json::json!({"ok": true}));
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["result"]["ok"], true);
    }

    #[test]
    fn text_result_shape() {
        let value = text_result("hello");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "hello");
    }
}
