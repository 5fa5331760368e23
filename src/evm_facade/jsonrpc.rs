//! Shared JSON-RPC 2.0 envelope for both `/rpc` (internal Token Service
//! calls) and `/eth` (the Ethereum-compatible surface).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, JsonRpcError};

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn err(id: Value, error: &BridgeError) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error.into()) }
    }
}
