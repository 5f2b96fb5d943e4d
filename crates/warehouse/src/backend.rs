//! The execution seam shared by both backends.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{BackendKind, WarehouseConfig};
use crate::credentials::{CredentialCache, StsCredentialProvider};
use crate::data_api::RedshiftDataApi;
use crate::error::ExecutionError;
use crate::limit::AdmissionLimit;
use crate::polling::PollingExecutor;
use crate::redshift::RedshiftConnector;
use crate::result::QueryResult;
use crate::session::{SessionExecutor, SessionPool};

/// Per-request execution bounds: an absolute deadline and the caller's
/// cancellation token.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Deadline is `timeout` from now.
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancel,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `fut` until it completes, the deadline passes or the caller
    /// cancels, whichever happens first. Cancellation wins ties.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => res.map_err(|_| Interrupt::Deadline),
        }
    }

    /// The caller-facing error for an interrupted call.
    pub fn interrupted(&self, interrupt: Interrupt) -> ExecutionError {
        match interrupt {
            Interrupt::Deadline => ExecutionError::Timeout {
                seconds: self.timeout.as_secs(),
            },
            Interrupt::Cancelled => ExecutionError::Cancelled,
        }
    }
}

/// Why a raced future did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Deadline,
    Cancelled,
}

/// Runs a guarded, read-only SQL batch and returns its encoded result.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name for logs and audit entries.
    fn name(&self) -> &'static str;

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult, ExecutionError>;
}

/// Build the backend selected by `cfg.backend`, wrapped in an admission limit.
pub async fn build_backend(cfg: &WarehouseConfig) -> Result<Arc<dyn ExecutionBackend>, ExecutionError> {
    let inner: Arc<dyn ExecutionBackend> = match cfg.backend {
        BackendKind::DataApi => {
            let api = RedshiftDataApi::new(cfg).await?;
            Arc::new(PollingExecutor::new(Arc::new(api)))
        }
        BackendKind::Session => {
            let role_arn = cfg
                .role_arn
                .clone()
                .ok_or_else(|| ExecutionError::Validation("REDSHIFT_ROLE_ARN is not set".into()))?;
            let provider = StsCredentialProvider::new(&cfg.region, role_arn).await;
            let credentials = Arc::new(CredentialCache::new(Arc::new(provider), cfg.credential_skew()));
            let connector = RedshiftConnector::new(cfg, credentials);
            let pool = SessionPool::new(
                Arc::new(connector),
                cfg.session_pool_size as usize,
                cfg.credential_skew(),
            );
            Arc::new(SessionExecutor::new(Arc::new(pool)))
        }
    };

    info!(
        backend = inner.name(),
        max_in_flight = cfg.max_in_flight,
        "Execution backend ready"
    );

    Ok(Arc::new(AdmissionLimit::new(inner, cfg.max_in_flight as usize)))
}
