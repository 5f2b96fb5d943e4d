//! Bounded admission in front of an execution backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::backend::{ExecutionBackend, ExecutionContext, Interrupt};
use crate::error::ExecutionError;
use crate::result::QueryResult;

/// Caps the number of queries executing at once. Time spent waiting for a
/// slot counts against the query deadline.
pub struct AdmissionLimit {
    inner: Arc<dyn ExecutionBackend>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionLimit {
    pub fn new(inner: Arc<dyn ExecutionBackend>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl ExecutionBackend for AdmissionLimit {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult, ExecutionError> {
        let _permit = match ctx.race(self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ExecutionError::Connectivity("admission limit closed".into()));
            }
            Err(Interrupt::Deadline) => {
                warn!(capacity = self.capacity, "No execution slot before deadline");
                return Err(ExecutionError::Saturated {
                    seconds: ctx.timeout().as_secs(),
                });
            }
            Err(interrupt) => return Err(ctx.interrupted(interrupt)),
        };

        debug!(available = self.available(), "Execution slot acquired");
        self.inner.execute(sql, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    /// Blocks every call until released; counts calls.
    struct BlockingBackend {
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionBackend for BlockingBackend {
        fn name(&self) -> &'static str {
            "blocking"
        }

        async fn execute(&self, _sql: &str, _ctx: &ExecutionContext) -> Result<QueryResult, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(QueryResult::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_limit_times_out_waiting_callers() {
        let inner = Arc::new(BlockingBackend {
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let limit = Arc::new(AdmissionLimit::new(inner.clone(), 1));

        let first = {
            let limit = limit.clone();
            tokio::spawn(async move {
                let ctx = ExecutionContext::new(Duration::from_secs(60), CancellationToken::new());
                limit.execute("SELECT 1", &ctx).await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(limit.available(), 0);

        let ctx = ExecutionContext::new(Duration::from_secs(1), CancellationToken::new());
        let err = limit.execute("SELECT 2", &ctx).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Saturated { seconds: 1 }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        inner.release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(limit.available(), 1);
    }

    #[tokio::test]
    async fn cancelled_while_waiting() {
        let inner = Arc::new(BlockingBackend {
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let limit = AdmissionLimit::new(inner.clone(), 1);
        let _held = limit.permits.clone().acquire_owned().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ExecutionContext::new(Duration::from_secs(60), cancel);
        let err = limit.execute("SELECT 1", &ctx).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }
}
