//! Pooled persistent sessions.
//!
//! A [`SessionPool`] owns at most `size` open sessions. Each request checks
//! one out exclusively, runs its SQL, always commits, and hands the session
//! back only if it is still healthy. A lease dropped without being released
//! (deadline, caller cancellation) discards its session.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::{ExecutionBackend, ExecutionContext};
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::result::{encode, QueryResult, RawResultSet};

/// Where a session is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// One open, authenticated database session.
#[async_trait]
pub trait WarehouseSession: Send {
    fn is_open(&self) -> bool;

    /// Database identity the session authenticated as.
    fn identity(&self) -> &str;

    /// Expiry of the credentials the session was opened with.
    fn credentials_expire_at(&self) -> Option<DateTime<Utc>>;

    async fn query(&mut self, sql: &str) -> Result<RawResultSet, ExecutionError>;

    /// End the current transaction, releasing any locks it holds.
    async fn commit(&mut self) -> Result<(), ExecutionError>;
}

/// Opens new sessions for the pool.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn WarehouseSession>, ExecutionError>;
}

// ── Pool ─────────────────────────────────────────────────────────

/// Exclusive use of one session plus its pool slot.
pub struct SessionLease {
    session: Box<dyn WarehouseSession>,
    _slot: OwnedSemaphorePermit,
}

impl SessionLease {
    pub fn session(&mut self) -> &mut dyn WarehouseSession {
        self.session.as_mut()
    }
}

pub struct SessionPool {
    connector: Arc<dyn SessionConnector>,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn WarehouseSession>>>,
    skew: Duration,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn SessionConnector>, size: usize, skew: Duration) -> Self {
        let size = size.max(1);
        Self {
            connector,
            slots: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            skew,
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    fn is_reusable(&self, session: &dyn WarehouseSession, now: DateTime<Utc>) -> bool {
        session.is_open()
            && session
                .credentials_expire_at()
                .map_or(true, |expires_at| now + self.skew < expires_at)
    }

    /// Wait (FIFO) for a slot, then reuse a healthy idle session or open a new one.
    pub async fn checkout(&self, ctx: &ExecutionContext) -> Result<SessionLease, ExecutionError> {
        let slot = match ctx.race(self.slots.clone().acquire_owned()).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) => return Err(ExecutionError::Connectivity("session pool closed".into())),
            Err(interrupt) => return Err(ctx.interrupted(interrupt)),
        };

        let now = Utc::now();
        loop {
            let candidate = self.idle.lock().await.pop();
            match candidate {
                Some(session) if self.is_reusable(session.as_ref(), now) => {
                    debug!(identity = %session.identity(), "Reusing pooled session");
                    return Ok(SessionLease { session, _slot: slot });
                }
                Some(session) => {
                    info!(identity = %session.identity(), "Discarding closed or expiring session");
                }
                None => break,
            }
        }

        let session = ctx
            .race(self.connector.open())
            .await
            .map_err(|i| ctx.interrupted(i))??;
        info!(identity = %session.identity(), "Opened new session");
        Ok(SessionLease { session, _slot: slot })
    }

    /// Return a session to the pool, or discard it when unhealthy.
    pub async fn release(&self, lease: SessionLease, healthy: bool) {
        let SessionLease { session, _slot } = lease;
        if healthy && session.is_open() {
            self.idle.lock().await.push(session);
        } else {
            debug!(identity = %session.identity(), "Dropping unhealthy session");
        }
    }
}

// ── Executor ─────────────────────────────────────────────────────

/// Runs queries on pooled sessions.
pub struct SessionExecutor {
    pool: Arc<SessionPool>,
}

impl SessionExecutor {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }
}

/// Run `sql` then always commit, returning both outcomes.
async fn query_then_commit(
    session: &mut dyn WarehouseSession,
    sql: &str,
) -> (Result<RawResultSet, ExecutionError>, Result<(), ExecutionError>) {
    let query = session.query(sql).await;
    let commit = session.commit().await;
    (query, commit)
}

#[async_trait]
impl ExecutionBackend for SessionExecutor {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult, ExecutionError> {
        let mut lease = self.pool.checkout(ctx).await?;

        let outcome = ctx.race(query_then_commit(lease.session(), sql)).await;
        let (query, commit) = match outcome {
            Ok(outcome) => outcome,
            Err(interrupt) => {
                let err = ctx.interrupted(interrupt);
                warn!(error = %err, "Session query interrupted, discarding session");
                drop(lease);
                return Err(err);
            }
        };

        let mut healthy = true;
        if let Err(e) = &query {
            healthy &= e.kind() != ExecutionErrorKind::Connectivity;
        }
        if let Err(e) = &commit {
            warn!(error = %e, "COMMIT failed");
            healthy = false;
        }
        self.pool.release(lease, healthy).await;

        query.map(encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tokio_util::sync::CancellationToken;

    /// Stores the SQL in a connection-level cursor on execute and reads it
    /// back on fetch, so a session used by two callers at once would hand
    /// one caller the other's rows. SQL containing `fail`, `disconnect` or
    /// `hang` triggers a backend error, a dropped connection or a query that
    /// never completes.
    struct FakeSession {
        id: usize,
        open: bool,
        expires_at: Option<DateTime<Utc>>,
        commits: Arc<AtomicUsize>,
        cursor: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl WarehouseSession for FakeSession {
        fn is_open(&self) -> bool {
            self.open
        }

        fn identity(&self) -> &str {
            "IAMR:reader"
        }

        fn credentials_expire_at(&self) -> Option<DateTime<Utc>> {
            self.expires_at
        }

        async fn query(&mut self, sql: &str) -> Result<RawResultSet, ExecutionError> {
            *self.cursor.lock().unwrap() = Some(sql.to_string());
            tokio::time::sleep(StdDuration::from_millis((self.id as u64 % 3) + 1)).await;
            if sql.contains("hang") {
                std::future::pending::<()>().await;
            }
            if sql.contains("disconnect") {
                self.open = false;
                return Err(ExecutionError::Connectivity("connection reset".into()));
            }
            if sql.contains("fail") {
                return Err(ExecutionError::Backend("division by zero".into()));
            }
            let fetched = self.cursor.lock().unwrap().take();
            Ok(RawResultSet {
                columns: vec!["echo".into(), "session".into()],
                rows: vec![vec![json!(fetched), json!(self.id)]],
            })
        }

        async fn commit(&mut self) -> Result<(), ExecutionError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        opened: AtomicUsize,
        commits: Arc<AtomicUsize>,
        lifetime: Duration,
    }

    impl FakeConnector {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                commits: Arc::new(AtomicUsize::new(0)),
                lifetime,
            })
        }
    }

    #[async_trait]
    impl SessionConnector for FakeConnector {
        async fn open(&self) -> Result<Box<dyn WarehouseSession>, ExecutionError> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                id,
                open: true,
                expires_at: Some(Utc::now() + self.lifetime),
                commits: self.commits.clone(),
                cursor: Arc::new(std::sync::Mutex::new(None)),
            }))
        }
    }

    fn executor(connector: Arc<FakeConnector>, size: usize) -> Arc<SessionExecutor> {
        let pool = SessionPool::new(connector, size, Duration::seconds(60));
        Arc::new(SessionExecutor::new(Arc::new(pool)))
    }

    fn ctx(secs: u64) -> ExecutionContext {
        ExecutionContext::new(StdDuration::from_secs(secs), CancellationToken::new())
    }

    #[tokio::test]
    async fn concurrent_callers_only_see_their_own_rows() {
        let connector = FakeConnector::new(Duration::hours(1));
        let executor = executor(connector.clone(), 4);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    let sql = format!("SELECT 'caller-{i}'");
                    let result = executor.execute(&sql, &ctx(30)).await.unwrap();
                    (sql, result)
                })
            })
            .collect();

        for h in handles {
            let (sql, result) = h.await.unwrap();
            assert_eq!(result.row_count(), 1);
            assert_eq!(result.get_value(0, "echo"), Some(&Value::String(sql)));
        }
        assert!(connector.opened.load(Ordering::SeqCst) <= 4);
        assert_eq!(connector.commits.load(Ordering::SeqCst), 32);
        assert!(executor.pool().idle_count().await <= 4);
    }

    #[tokio::test]
    async fn healthy_session_is_reused() {
        let connector = FakeConnector::new(Duration::hours(1));
        let executor = executor(connector.clone(), 2);

        executor.execute("SELECT 1", &ctx(30)).await.unwrap();
        executor.execute("SELECT 2", &ctx(30)).await.unwrap();

        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.commits.load(Ordering::SeqCst), 2);
        assert_eq!(executor.pool().idle_count().await, 1);
    }

    #[tokio::test]
    async fn expiring_session_is_replaced() {
        // Credentials expire inside the refresh skew.
        let connector = FakeConnector::new(Duration::seconds(30));
        let executor = executor(connector.clone(), 2);

        executor.execute("SELECT 1", &ctx(30)).await.unwrap();
        executor.execute("SELECT 2", &ctx(30)).await.unwrap();

        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_query_still_commits_and_keeps_session() {
        let connector = FakeConnector::new(Duration::hours(1));
        let executor = executor(connector.clone(), 1);

        let err = executor.execute("SELECT 1/0 -- fail", &ctx(30)).await.unwrap_err();
        assert_eq!(err.kind(), ExecutionErrorKind::BackendFailure);
        assert_eq!(connector.commits.load(Ordering::SeqCst), 1);

        executor.execute("SELECT 1", &ctx(30)).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_connection_discards_session() {
        let connector = FakeConnector::new(Duration::hours(1));
        let executor = executor(connector.clone(), 1);

        let err = executor.execute("SELECT 'disconnect'", &ctx(30)).await.unwrap_err();
        assert_eq!(err.kind(), ExecutionErrorKind::Connectivity);
        assert_eq!(executor.pool().idle_count().await, 0);

        executor.execute("SELECT 1", &ctx(30)).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_query_discards_session_and_frees_slot() {
        let connector = FakeConnector::new(Duration::hours(1));
        let executor = executor(connector.clone(), 1);

        let err = executor.execute("SELECT 'hang'", &ctx(5)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { seconds: 5 }));
        assert_eq!(executor.pool().idle_count().await, 0);

        let result = executor.execute("SELECT 1", &ctx(5)).await.unwrap();
        assert_eq!(result.get_value(0, "session"), Some(&json!(1)));
    }
}
