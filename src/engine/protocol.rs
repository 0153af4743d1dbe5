//! Wire envelopes exchanged with engine processes.
//!
//! The query engine speaks GraphQL-shaped JSON over HTTP; the introspection
//! engine speaks JSON-RPC 2.0, one object per line over stdio. Both answer
//! with either a result or structured errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Vec<Value>,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Vec<Value>) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Structured JSON-RPC error.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<RpcErrorData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorData {
    #[serde(default)]
    pub message: Option<String>,
}

impl RpcError {
    /// The most specific human-readable message: `data.message`, then
    /// `message`.
    pub fn detail(&self) -> String {
        self.data
            .as_ref()
            .and_then(|d| d.message.clone())
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("engine returned error code {}", code),
                None => "engine returned an error without a message".to_string(),
            })
    }
}

/// GraphQL-style response envelope of the query engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GqlError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GqlError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub path: Option<Vec<Value>>,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GqlResponse {
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// All error messages joined with `"; "`.
    pub fn error_message(&self) -> String {
        self.errors
            .iter()
            .flatten()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// `result` payload of an `introspect` call.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectResult {
    #[serde(rename = "dataModel")]
    pub data_model: String,
}
