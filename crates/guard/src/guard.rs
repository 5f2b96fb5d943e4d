//! The read-only gate.

use tracing::warn;

use crate::classify::{classify_batch, StatementBatch, StatementKind};

/// Message reported to callers whose batch is rejected.
pub const REJECTION_MESSAGE: &str = "Only SELECT statements are allowed";

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// At least one statement is not a plain `SELECT`.
    #[error("Only SELECT statements are allowed")]
    NotReadOnly {
        /// Kind of the first offending statement.
        kind: StatementKind,
        batch: StatementBatch,
    },

    /// The batch contains no statements at all.
    #[error("Only SELECT statements are allowed")]
    Empty,
}

impl GuardError {
    /// Kind that caused the rejection (`None` for an empty batch).
    pub fn kind(&self) -> Option<StatementKind> {
        match self {
            GuardError::NotReadOnly { kind, .. } => Some(*kind),
            GuardError::Empty => None,
        }
    }
}

/// Classify `sql` and accept it only if every statement is a `SELECT`.
pub fn check_read_only(sql: &str) -> Result<StatementBatch, GuardError> {
    let batch = classify_batch(sql);

    if batch.statements().is_empty() {
        warn!("Rejected SQL batch without statements");
        return Err(GuardError::Empty);
    }

    if let Some(rejected) = batch.first_rejected() {
        let kind = rejected.kind;
        warn!(
            kind = %kind,
            statements = batch.statements().len(),
            parse_error = batch.parse_error(),
            "Rejected non-SELECT SQL batch"
        );
        return Err(GuardError::NotReadOnly { kind, batch });
    }

    Ok(batch)
}
