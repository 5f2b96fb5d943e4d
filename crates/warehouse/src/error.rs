//! Execution errors and their coarse kinds.

use aws_sdk_redshiftdata::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use serde::{Deserialize, Serialize};

/// Coarse classification reported to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Validation,
    Auth,
    BackendFailure,
    Timeout,
    Connectivity,
    Cancelled,
}

impl ExecutionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionErrorKind::Validation => "validation",
            ExecutionErrorKind::Auth => "auth",
            ExecutionErrorKind::BackendFailure => "backend_failure",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::Connectivity => "connectivity",
            ExecutionErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Errors that can occur while running a query on the warehouse.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    /// The statement reached a terminal non-success state.
    #[error("Query failed with status: {status}{}", reason_suffix(.reason))]
    StatementFailed {
        statement_id: String,
        status: String,
        reason: Option<String>,
    },

    /// The warehouse rejected or failed the request.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The warehouse or an AWS endpoint could not be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The query did not finish before its deadline.
    #[error("Query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// No execution slot became free before the deadline.
    #[error("No execution slot became available within {seconds}s")]
    Saturated { seconds: u64 },

    /// The caller went away before the query finished.
    #[error("Query cancelled by caller")]
    Cancelled,

    /// The warehouse or AWS rejected the credentials in use.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The request was malformed for the backend.
    #[error("Validation error: {0}")]
    Validation(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::StatementFailed { .. } | ExecutionError::Backend(_) => {
                ExecutionErrorKind::BackendFailure
            }
            ExecutionError::Connectivity(_) => ExecutionErrorKind::Connectivity,
            ExecutionError::Timeout { .. } | ExecutionError::Saturated { .. } => {
                ExecutionErrorKind::Timeout
            }
            ExecutionError::Cancelled => ExecutionErrorKind::Cancelled,
            ExecutionError::Auth(_) => ExecutionErrorKind::Auth,
            ExecutionError::Validation(_) => ExecutionErrorKind::Validation,
        }
    }

    /// Map an AWS SDK error: credential rejections are auth failures, other
    /// service-side rejections are backend failures, and everything else
    /// (dispatch, timeouts, malformed responses) is a connectivity problem.
    pub(crate) fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        let detail = format!("{operation}: {}", DisplayErrorContext(&err));
        let auth = is_auth_error_code(err.code());
        match err {
            SdkError::ServiceError(_) if auth => ExecutionError::Auth(detail),
            SdkError::ServiceError(_) => ExecutionError::Backend(detail),
            _ => ExecutionError::Connectivity(detail),
        }
    }
}

/// AWS error codes meaning the caller's credentials were refused.
const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
];

fn is_auth_error_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| AUTH_ERROR_CODES.contains(&c))
}
