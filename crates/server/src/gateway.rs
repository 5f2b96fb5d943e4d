//! Request orchestration: authenticate, validate, guard, execute, encode.
//!
//! Every call yields exactly one [`JsonRpcResponse`] and one audit entry.
//! Authentication and the read-only guard both run before any backend work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sluice_guard::check_read_only;
use sluice_mcp::{error_codes, JsonRpcResponse, RequestValidator, RpcError, RUN_QUERY_METHOD};
use sluice_warehouse::{ExecutionBackend, ExecutionContext, ExecutionError, ExecutionErrorKind, QueryResult};

use crate::audit_log::{AuditEntry, AuditLog, AuditOutcome};
use crate::auth::{fingerprint, Authenticator};

pub struct Gateway {
    auth: Authenticator,
    backend: Arc<dyn ExecutionBackend>,
    audit: Arc<AuditLog>,
    query_timeout: Duration,
}

impl Gateway {
    pub fn new(
        auth: Authenticator,
        backend: Arc<dyn ExecutionBackend>,
        audit: Arc<AuditLog>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            auth,
            backend,
            audit,
            query_timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// `api_key` is the raw `X-API-Key` header value, if the header was sent.
    pub async fn handle(&self, api_key: Option<&[u8]>, body: &[u8], cancel: CancellationToken) -> JsonRpcResponse {
        let started = Instant::now();

        if let Err(e) = self.auth.verify(api_key) {
            warn!(reason = %e, "Rejected unauthenticated request");
            let mut entry = AuditEntry::new(AuditOutcome::Unauthorized, Value::Null);
            entry.key_presented = api_key.is_some();
            entry.key_fingerprint = api_key.map(fingerprint);
            self.finish(entry, started);
            return RpcError::Unauthorized.into_response(Value::Null);
        }

        let call = match RequestValidator::validate(body) {
            Ok(call) => call,
            Err(rejected) => {
                let outcome = match &rejected.error {
                    RpcError::MethodNotFound(_) => AuditOutcome::MethodNotFound,
                    RpcError::MissingQuery => AuditOutcome::MissingQuery,
                    _ => AuditOutcome::InvalidRequest,
                };
                debug!(reason = rejected.error.label(), error = %rejected.error, "Rejected malformed request");
                let mut entry = AuditEntry::new(outcome, rejected.id.clone());
                entry.key_presented = true;
                if let RpcError::MethodNotFound(method) = &rejected.error {
                    entry.method = Some(method.clone());
                }
                entry.error_code = Some(rejected.error.to_rpc_error().code);
                self.finish(entry, started);
                return rejected.error.into_response(rejected.id);
            }
        };

        let mut entry = AuditEntry::new(AuditOutcome::Succeeded, call.id.clone());
        entry.key_presented = true;
        entry.method = Some(RUN_QUERY_METHOD.to_string());
        entry.sql = Some(call.sql.clone());

        let batch = match check_read_only(&call.sql) {
            Ok(batch) => batch,
            Err(e) => {
                if let sluice_guard::GuardError::NotReadOnly { batch, .. } = &e {
                    entry.statement_kinds = batch.kinds().iter().map(|k| k.to_string()).collect();
                }
                let err = RpcError::InvalidParams(e.to_string());
                entry.outcome = AuditOutcome::Rejected;
                entry.error_code = Some(err.to_rpc_error().code);
                entry.error_message = Some(err.to_string());
                self.finish(entry, started);
                return err.into_response(call.id);
            }
        };
        entry.statement_kinds = batch.kinds().iter().map(|k| k.to_string()).collect();
        entry.backend = Some(self.backend.name().to_string());

        let ctx = ExecutionContext::new(self.query_timeout, cancel);
        match self.backend.execute(&call.sql, &ctx).await {
            Ok(result) => {
                info!(
                    rows = result.row_count(),
                    columns = result.column_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query succeeded"
                );
                entry.row_count = Some(result.row_count());
                self.finish(entry, started);
                JsonRpcResponse::success(call.id, result_payload(result))
            }
            Err(e) => {
                warn!(kind = e.kind().as_str(), error = %e, "Query failed");
                let err = execution_error(&e);
                entry.outcome = match e.kind() {
                    ExecutionErrorKind::Cancelled => AuditOutcome::Cancelled,
                    _ => AuditOutcome::Failed,
                };
                entry.error_code = Some(err.to_rpc_error().code);
                entry.error_kind = Some(e.kind().as_str().to_string());
                entry.error_message = Some(e.to_string());
                self.finish(entry, started);
                err.into_response(call.id)
            }
        }
    }

    fn finish(&self, mut entry: AuditEntry, started: Instant) {
        entry.duration_ms = started.elapsed().as_millis() as u64;
        self.audit.record(entry);
    }
}

/// `{"columns": [...], "rows": [{...}], "row_count": n}`
fn result_payload(result: QueryResult) -> Value {
    let row_count = result.row_count();
    json!({
        "columns": result.columns,
        "rows": result.rows,
        "row_count": row_count,
    })
}

fn execution_error(err: &ExecutionError) -> RpcError {
    let kind = err.kind();
    let code = match kind {
        ExecutionErrorKind::Timeout => error_codes::EXECUTION_TIMEOUT,
        ExecutionErrorKind::Connectivity => error_codes::CONNECTIVITY,
        ExecutionErrorKind::BackendFailure
        | ExecutionErrorKind::Validation
        | ExecutionErrorKind::Auth
        | ExecutionErrorKind::Cancelled => error_codes::EXECUTION_FAILED,
    };
    RpcError::Execution {
        code,
        kind: kind.as_str().to_string(),
        message: err.to_string(),
    }
}
