//! Submit-then-poll execution over an asynchronous statement API.
//!
//! [`PollingExecutor`] drives a [`StatementApi`] through
//! `Submitted → {Finished, Failed, Aborted}` with exponential-backoff polling,
//! an absolute deadline and best-effort cancellation when either the deadline
//! passes or the caller goes away.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{ExecutionBackend, ExecutionContext};
use crate::error::ExecutionError;
use crate::result::{encode, QueryResult, RawResultSet};

/// Upper bound on the best-effort cancel call issued after a deadline miss.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Statement API
// ---------------------------------------------------------------------------

/// Lifecycle state reported by the statement API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementStatus {
    Submitted,
    Picked,
    Started,
    Finished { has_result_set: bool },
    Failed { error: Option<String> },
    Aborted,
    Unknown(String),
}

impl StatementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatementStatus::Finished { .. } | StatementStatus::Failed { .. } | StatementStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatementStatus::Submitted => "SUBMITTED",
            StatementStatus::Picked => "PICKED",
            StatementStatus::Started => "STARTED",
            StatementStatus::Finished { .. } => "FINISHED",
            StatementStatus::Failed { .. } => "FAILED",
            StatementStatus::Aborted => "ABORTED",
            StatementStatus::Unknown(s) => s,
        }
    }
}

impl fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four calls an asynchronous execution API must offer.
#[async_trait]
pub trait StatementApi: Send + Sync {
    /// Submit `sql`, returning the statement id.
    async fn submit(&self, sql: &str) -> Result<String, ExecutionError>;

    async fn describe(&self, statement_id: &str) -> Result<StatementStatus, ExecutionError>;

    /// Fetch the complete result of a finished statement.
    async fn fetch(&self, statement_id: &str) -> Result<RawResultSet, ExecutionError>;

    async fn cancel(&self, statement_id: &str) -> Result<(), ExecutionError>;
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential polling delay with a small time-derived jitter.
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Jitter is drawn from `0..jitter_ms` milliseconds (0 disables it).
    pub jitter_ms: u32,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            factor: 1.5,
            max: Duration::from_millis(2000),
            jitter_ms: 100,
        }
    }
}

impl PollBackoff {
    /// Delay following `current`, capped at `max`.
    pub fn advance(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.factor) as u64;
        Duration::from_millis(next_ms).min(self.max)
    }

    /// Jitter without an RNG: the sub-second nanos of the wall clock.
    pub fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        Duration::from_millis(u64::from(nanos % self.jitter_ms))
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Stateless submit/poll backend; safe to share between concurrent callers.
pub struct PollingExecutor {
    api: Arc<dyn StatementApi>,
    backoff: PollBackoff,
}

impl PollingExecutor {
    pub fn new(api: Arc<dyn StatementApi>) -> Self {
        Self {
            api,
            backoff: PollBackoff::default(),
        }
    }

    /// Poll until the statement reaches a terminal state. Returns whether the
    /// finished statement produced a result set.
    async fn wait_for_completion(&self, statement_id: &str) -> Result<bool, ExecutionError> {
        let start = Instant::now();
        let mut delay = self.backoff.initial;

        loop {
            let status = self.api.describe(statement_id).await?;

            debug!(
                statement_id = %statement_id,
                status = %status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Polling statement status"
            );

            match status {
                StatementStatus::Finished { has_result_set } => return Ok(has_result_set),

                StatementStatus::Failed { error } => {
                    error!(statement_id = %statement_id, reason = ?error, "Statement failed");
                    return Err(ExecutionError::StatementFailed {
                        statement_id: statement_id.to_string(),
                        status: "FAILED".into(),
                        reason: error,
                    });
                }

                StatementStatus::Aborted => {
                    warn!(statement_id = %statement_id, "Statement was aborted");
                    return Err(ExecutionError::StatementFailed {
                        statement_id: statement_id.to_string(),
                        status: "ABORTED".into(),
                        reason: None,
                    });
                }

                StatementStatus::Submitted
                | StatementStatus::Picked
                | StatementStatus::Started
                | StatementStatus::Unknown(_) => {}
            }

            tokio::time::sleep(delay + self.backoff.jitter()).await;
            delay = self.backoff.advance(delay);
        }
    }

    async fn cancel_best_effort(&self, statement_id: &str) {
        match tokio::time::timeout(CANCEL_TIMEOUT, self.api.cancel(statement_id)).await {
            Ok(Ok(())) => info!(statement_id = %statement_id, "Statement cancellation requested"),
            Ok(Err(e)) => warn!(statement_id = %statement_id, error = %e, "Statement cancellation failed"),
            Err(_) => warn!(statement_id = %statement_id, "Statement cancellation timed out"),
        }
    }
}

#[async_trait]
impl ExecutionBackend for PollingExecutor {
    fn name(&self) -> &'static str {
        "data_api"
    }

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult, ExecutionError> {
        let statement_id = ctx
            .race(self.api.submit(sql))
            .await
            .map_err(|i| ctx.interrupted(i))??;

        info!(statement_id = %statement_id, "Statement submitted");

        let has_result_set = match ctx.race(self.wait_for_completion(&statement_id)).await {
            Ok(outcome) => outcome?,
            Err(interrupt) => {
                let err = ctx.interrupted(interrupt);
                warn!(statement_id = %statement_id, error = %err, "Statement interrupted, cancelling");
                self.cancel_best_effort(&statement_id).await;
                return Err(err);
            }
        };

        if !has_result_set {
            return Ok(QueryResult::default());
        }

        let raw = ctx
            .race(self.api.fetch(&statement_id))
            .await
            .map_err(|i| ctx.interrupted(i))??;

        debug!(
            statement_id = %statement_id,
            columns = raw.columns.len(),
            rows = raw.rows.len(),
            "Fetched statement result"
        );

        Ok(encode(raw))
    }
}
