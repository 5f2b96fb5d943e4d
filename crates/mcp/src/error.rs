//! Error types for the query endpoint.

use serde_json::{json, Value};

use crate::types::{error_codes, JsonRpcError, JsonRpcResponse};

/// Every way a call can fail, as reported to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The shared secret was missing or wrong.
    #[error("Unauthorized: Invalid API key")]
    Unauthorized,

    /// The body is not a JSON-RPC 2.0 request object.
    #[error("Invalid Request")]
    InvalidRequest,

    /// A well-formed request named a method other than `run_redshift_query`.
    #[error("Method not found")]
    MethodNotFound(String),

    /// `params.query` is absent, not a string, or blank.
    #[error("Missing query parameter")]
    MissingQuery,

    /// The parameters were present but not acceptable.
    #[error("{0}")]
    InvalidParams(String),

    /// The warehouse failed, timed out or could not be reached.
    #[error("{message}")]
    Execution {
        code: i64,
        kind: String,
        message: String,
    },
}

impl RpcError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (code, data) = match self {
            RpcError::Unauthorized => (error_codes::UNAUTHORIZED, None),
            RpcError::InvalidRequest => (error_codes::INVALID_REQUEST, None),
            RpcError::MethodNotFound(_) => (error_codes::METHOD_NOT_FOUND, None),
            RpcError::MissingQuery | RpcError::InvalidParams(_) => (error_codes::INVALID_PARAMS, None),
            RpcError::Execution { code, kind, .. } => (*code, Some(json!({ "kind": kind }))),
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data,
        }
    }

    /// Build the response for this error. Unauthorized responses never echo
    /// the request id.
    pub fn into_response(self, id: Value) -> JsonRpcResponse {
        let id = match self {
            RpcError::Unauthorized => Value::Null,
            _ => id,
        };
        JsonRpcResponse::failure(id, self.to_rpc_error())
    }

    /// Short label for logs and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            RpcError::Unauthorized => "unauthorized",
            RpcError::InvalidRequest => "invalid_request",
            RpcError::MethodNotFound(_) => "method_not_found",
            RpcError::MissingQuery => "missing_query",
            RpcError::InvalidParams(_) => "invalid_params",
            RpcError::Execution { .. } => "execution_failed",
        }
    }
}
