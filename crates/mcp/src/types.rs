//! JSON-RPC 2.0 wire types for the query endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version accepted.
pub const JSONRPC_VERSION: &str = "2.0";

/// The only method the gateway serves.
pub const RUN_QUERY_METHOD: &str = "run_redshift_query";

// ── JSON-RPC 2.0 Base Types ─────────────────────────────────────────

/// A JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Always present; `null` when no id could be recovered.
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ── Error codes ─────────────────────────────────────────────────────

/// Standard JSON-RPC 2.0 codes plus the gateway's server-error range.
pub mod error_codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const UNAUTHORIZED: i64 = -32001;
    pub const EXECUTION_FAILED: i64 = -32010;
    pub const EXECUTION_TIMEOUT: i64 = -32011;
    pub const CONNECTIVITY: i64 = -32012;
}

// ── Helpers ─────────────────────────────────────────────────────────

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response from a prepared error object.
    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}
