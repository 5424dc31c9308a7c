use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Refers to any valid JSON-RPC object that can be decoded off the wire, or
/// encoded to be sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JSONRpcResult {
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

/// A uniquely identifying ID for a request in JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => s.fmt(f),
            RequestId::Number(n) => n.fmt(f),
        }
    }
}

/// A request that expects a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(flatten)]
    pub request: Request,
}

/// A notification which does not expect a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// A successful (non-error) response to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: JSONRpcResult,
}

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// A response to a request that indicates a transport-level error. Business
/// failures never travel in this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: ErrorObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JSONRPCRequest {
    /// Build a request whose params are the fields of `params`.
    pub fn new<T: Serialize>(id: RequestId, method: &str, params: &T) -> serde_json::Result<Self> {
        let other = match serde_json::to_value(params)? {
            Value::Object(obj) => obj.into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                let mut map = HashMap::new();
                map.insert("params".to_string(), other);
                map
            }
        };
        Ok(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            request: Request {
                method: method.to_string(),
                params: Some(RequestParams { other }),
            },
        })
    }

    /// Decode the params object into a typed value.
    pub fn params<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        let obj: serde_json::Map<String, Value> = self
            .request
            .params
            .as_ref()
            .map(|p| p.other.clone().into_iter().collect())
            .unwrap_or_default();
        serde_json::from_value(Value::Object(obj))
    }
}

impl JSONRPCResponse {
    pub fn new<T: Serialize>(id: RequestId, result: &T) -> serde_json::Result<Self> {
        let other = match serde_json::to_value(result)? {
            Value::Object(obj) => obj.into_iter().collect(),
            other => {
                let mut map = HashMap::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Ok(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: JSONRpcResult { other },
        })
    }

    pub fn result<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        let obj: serde_json::Map<String, Value> = self.result.other.clone().into_iter().collect();
        serde_json::from_value(Value::Object(obj))
    }
}

impl JSONRPCError {
    pub fn new(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        }
    }
}
