//! Redshift sessions over the Postgres wire protocol, authenticated with
//! IAM-derived database credentials.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_redshift::config::Region;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, ConnectOptions, Executor, Row, TypeInfo};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::WarehouseConfig;
use crate::credentials::{CredentialCache, Credentials};
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::result::RawResultSet;
use crate::session::{ClusterEndpoint, SessionConnector, WarehouseSession};

const DEFAULT_PORT: u16 = 5439;

/// Database login issued for the assumed role.
pub struct DatabaseLogin {
    pub user: String,
    pub password: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cluster control-plane calls made with the assumed role's credentials.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn endpoint(&self, creds: &Credentials) -> Result<ClusterEndpoint, ExecutionError>;

    async fn database_login(&self, creds: &Credentials) -> Result<DatabaseLogin, ExecutionError>;
}

// ── AWS ──────────────────────────────────────────────────────────

/// `DescribeClusters` and `GetClusterCredentialsWithIAM` for one cluster.
pub struct AwsClusterApi {
    region: String,
    cluster_id: String,
    database: String,
}

impl AwsClusterApi {
    pub fn new(cfg: &WarehouseConfig) -> Self {
        Self {
            region: cfg.region.clone(),
            cluster_id: cfg.cluster_id().to_string(),
            database: cfg.database().to_string(),
        }
    }

    fn client_for(&self, creds: &Credentials) -> aws_sdk_redshift::Client {
        let conf = aws_sdk_redshift::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(creds.to_sdk_credentials())
            .build();
        aws_sdk_redshift::Client::from_conf(conf)
    }
}

#[async_trait]
impl ClusterApi for AwsClusterApi {
    async fn endpoint(&self, creds: &Credentials) -> Result<ClusterEndpoint, ExecutionError> {
        let resp = self
            .client_for(creds)
            .describe_clusters()
            .cluster_identifier(&self.cluster_id)
            .send()
            .await
            .map_err(|e| ExecutionError::from_sdk("DescribeClusters", e))?;

        let endpoint = resp
            .clusters()
            .first()
            .and_then(|c| c.endpoint())
            .ok_or_else(|| {
                ExecutionError::Connectivity(format!("cluster {} has no endpoint", self.cluster_id))
            })?;

        let host = endpoint
            .address()
            .ok_or_else(|| ExecutionError::Connectivity("cluster endpoint has no address".into()))?
            .to_string();
        let port = endpoint
            .port()
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);

        info!(host = %host, port, "Resolved cluster endpoint");
        Ok(ClusterEndpoint {
            host,
            port,
            database: self.database.clone(),
        })
    }

    async fn database_login(&self, creds: &Credentials) -> Result<DatabaseLogin, ExecutionError> {
        let resp = self
            .client_for(creds)
            .get_cluster_credentials_with_iam()
            .cluster_identifier(&self.cluster_id)
            .db_name(&self.database)
            .send()
            .await
            .map_err(|e| ExecutionError::from_sdk("GetClusterCredentialsWithIAM", e))?;

        let user = resp
            .db_user()
            .ok_or_else(|| ExecutionError::Connectivity("no database user in cluster credentials".into()))?
            .to_string();
        let password = resp
            .db_password()
            .ok_or_else(|| ExecutionError::Connectivity("no database password in cluster credentials".into()))?
            .to_string();
        let expires_at = resp
            .expiration()
            .and_then(|e| DateTime::from_timestamp(e.secs(), e.subsec_nanos()));

        Ok(DatabaseLogin {
            user,
            password,
            expires_at,
        })
    }
}

// ── Connector ────────────────────────────────────────────────────

/// Opens [`PgSession`]s: resolve the cluster endpoint once, then for every
/// new session take credentials from the cache, exchange them for a
/// database login and connect over TLS. A rejected control-plane call or
/// database login drops the cached role credentials.
pub struct RedshiftConnector {
    credentials: Arc<CredentialCache>,
    cluster: Arc<dyn ClusterApi>,
    endpoint: OnceCell<ClusterEndpoint>,
}

impl RedshiftConnector {
    pub fn new(cfg: &WarehouseConfig, credentials: Arc<CredentialCache>) -> Self {
        info!(
            region = %cfg.region,
            cluster = %cfg.cluster_id(),
            database = %cfg.database(),
            "Redshift session connector initialised"
        );
        Self::with_cluster_api(Arc::new(AwsClusterApi::new(cfg)), credentials)
    }

    pub fn with_cluster_api(cluster: Arc<dyn ClusterApi>, credentials: Arc<CredentialCache>) -> Self {
        Self {
            credentials,
            cluster,
            endpoint: OnceCell::new(),
        }
    }

    async fn prepare(&self, creds: &Credentials) -> Result<(ClusterEndpoint, DatabaseLogin), ExecutionError> {
        let endpoint = self
            .endpoint
            .get_or_try_init(|| self.cluster.endpoint(creds))
            .await?
            .clone();
        let login = self.cluster.database_login(creds).await?;
        Ok((endpoint, login))
    }
}

#[async_trait]
impl SessionConnector for RedshiftConnector {
    async fn open(&self) -> Result<Box<dyn WarehouseSession>, ExecutionError> {
        let creds = self.credentials.get().await?;

        let (endpoint, login) = match self.prepare(&creds).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Cluster control-plane call failed, dropping cached credentials");
                self.credentials.invalidate().await;
                return Err(e);
            }
        };

        let expires_at = match login.expires_at {
            Some(db) => db.min(creds.expires_at),
            None => creds.expires_at,
        };

        let connected = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .database(&endpoint.database)
            .username(&login.user)
            .password(&login.password)
            .ssl_mode(PgSslMode::Require)
            .application_name("sluice")
            .connect()
            .await;
        let conn = match connected {
            Ok(conn) => conn,
            Err(e) => {
                let err = classify_sqlx_error(e);
                if err.kind() == ExecutionErrorKind::Auth {
                    warn!(identity = %login.user, "Database login rejected, dropping cached credentials");
                    self.credentials.invalidate().await;
                }
                return Err(err);
            }
        };

        debug!(host = %endpoint.host, identity = %login.user, "Session connected");

        Ok(Box::new(PgSession {
            conn: Some(conn),
            identity: login.user,
            expires_at,
        }))
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A live connection; `conn` is `None` once a transport-level failure closed it.
pub struct PgSession {
    conn: Option<PgConnection>,
    identity: String,
    expires_at: DateTime<Utc>,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection, ExecutionError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExecutionError::Connectivity("session is closed".into()))
    }

    fn fail(&mut self, err: sqlx::Error) -> ExecutionError {
        let err = classify_sqlx_error(err);
        if err.kind() == ExecutionErrorKind::Connectivity {
            warn!(identity = %self.identity, error = %err, "Closing broken session");
            self.conn = None;
        }
        err
    }
}

#[async_trait]
impl WarehouseSession for PgSession {
    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn credentials_expire_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expires_at)
    }

    async fn query(&mut self, sql: &str) -> Result<RawResultSet, ExecutionError> {
        let conn = self.conn()?;
        match last_result_set(conn, sql).await {
            Ok(raw) => Ok(raw),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn commit(&mut self) -> Result<(), ExecutionError> {
        let conn = self.conn()?;
        match conn.execute(sqlx::raw_sql("COMMIT")).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }
}

/// Run a batch and keep the result of its last statement. Column metadata
/// comes from that statement's rows, or from describing the batch when it
/// returned none.
async fn last_result_set(conn: &mut PgConnection, sql: &str) -> Result<RawResultSet, sqlx::Error> {
    let mut sets = ResultSets::default();
    {
        let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *conn);
        while let Some(step) = stream.try_next().await? {
            match step.right() {
                Some(row) => sets.push_row(row),
                None => sets.finish_statement(),
            }
        }
    }

    let rows = sets.into_last();
    if !rows.is_empty() {
        return Ok(rows_to_raw(&rows));
    }

    match conn.describe(sql).await {
        Ok(described) => Ok(RawResultSet {
            columns: column_names(described.columns()),
            rows: Vec::new(),
        }),
        Err(sqlx::Error::Database(db)) => {
            // Multi-statement batches cannot be described.
            debug!(error = %db.message(), "No column metadata for empty result");
            Ok(RawResultSet::default())
        }
        Err(e) => Err(e),
    }
}

/// Splits a batch's row stream into per-statement result sets.
#[derive(Debug)]
struct ResultSets<R> {
    current: Vec<R>,
    last: Vec<R>,
}

impl<R> Default for ResultSets<R> {
    fn default() -> Self {
        Self {
            current: Vec::new(),
            last: Vec::new(),
        }
    }
}

impl<R> ResultSets<R> {
    fn push_row(&mut self, row: R) {
        self.current.push(row);
    }

    fn finish_statement(&mut self) {
        self.last = std::mem::take(&mut self.current);
    }

    /// Rows of the last completed statement; trailing rows with no
    /// completion yet count as their own statement.
    fn into_last(self) -> Vec<R> {
        if self.current.is_empty() {
            self.last
        } else {
            self.current
        }
    }
}

fn column_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

/// Simple-protocol rows arrive in text format; decode each cell as text and
/// type it by the column's type name. All rows belong to one statement.
fn rows_to_raw(rows: &[PgRow]) -> RawResultSet {
    let Some(first) = rows.first() else {
        return RawResultSet::default();
    };

    let columns = first.columns();
    let type_names: Vec<&str> = columns.iter().map(|c| c.type_info().name()).collect();

    RawResultSet {
        columns: column_names(columns),
        rows: rows
            .iter()
            .map(|row| {
                type_names
                    .iter()
                    .enumerate()
                    .map(|(i, type_name)| {
                        let text = row.try_get_unchecked::<Option<String>, _>(i).ok().flatten();
                        text_to_json(type_name, text)
                    })
                    .collect()
            })
            .collect(),
    }
}

fn text_to_json(type_name: &str, text: Option<String>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    match type_name {
        "BOOL" => match text.as_str() {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT4" | "FLOAT8" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        _ => Value::String(text),
    }
}

/// SQLSTATE class 28: invalid authorization specification.
const AUTH_SQLSTATE_CLASS: &str = "28";

/// Transport failures close the session; rejected logins are auth failures;
/// everything else the database reports is a backend failure.
fn classify_sqlx_error(err: sqlx::Error) -> ExecutionError {
    match &err {
        sqlx::Error::Database(db) => {
            let auth = db
                .code()
                .is_some_and(|code| code.starts_with(AUTH_SQLSTATE_CLASS));
            if auth {
                ExecutionError::Auth(db.message().to_string())
            } else {
                ExecutionError::Backend(db.message().to_string())
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ExecutionError::Connectivity(err.to_string()),
        _ => ExecutionError::Backend(err.to_string()),
    }
}
