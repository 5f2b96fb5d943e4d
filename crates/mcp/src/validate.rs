//! Envelope validation: raw body to a validated query call.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RpcError;
use crate::types::{JSONRPC_VERSION, RUN_QUERY_METHOD};

/// A request that passed every envelope check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCall {
    pub id: Value,
    pub sql: String,
}

/// Validation failure plus the id to answer with (`null` if none was recovered).
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub id: Value,
    pub error: RpcError,
}

impl Rejected {
    fn new(id: Value, error: RpcError) -> Self {
        Self { id, error }
    }
}

/// Checks run in order: JSON object, version, method, `params.query`.
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate(body: &[u8]) -> Result<ValidatedCall, Rejected> {
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            debug!(error = %e, "Request body is not JSON");
            Rejected::new(Value::Null, RpcError::InvalidRequest)
        })?;

        let Value::Object(envelope) = value else {
            return Err(Rejected::new(Value::Null, RpcError::InvalidRequest));
        };

        let id = envelope.get("id").cloned().unwrap_or(Value::Null);

        if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(Rejected::new(id, RpcError::InvalidRequest));
        }

        let Some(method) = envelope.get("method").and_then(Value::as_str) else {
            return Err(Rejected::new(id, RpcError::InvalidRequest));
        };

        if method != RUN_QUERY_METHOD {
            return Err(Rejected::new(id, RpcError::MethodNotFound(method.to_string())));
        }

        match query_param(&envelope) {
            Some(sql) => Ok(ValidatedCall { id, sql }),
            None => Err(Rejected::new(id, RpcError::MissingQuery)),
        }
    }
}

fn query_param(envelope: &Map<String, Value>) -> Option<String> {
    envelope
        .get("params")
        .and_then(|p| p.get("query"))
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .map(str::to_string)
}
