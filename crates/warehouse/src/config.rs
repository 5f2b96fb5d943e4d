use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sluice_core::config::{active_profile, profiled_env_opt, profiled_env_or, profiled_env_u32, profiled_env_u64};
use sluice_core::ConfigError;

const DEFAULT_REGION: &str = "us-east-1";

/// Which execution strategy serves queries. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Submit + poll through the Redshift Data API.
    DataApi,
    /// Pooled database sessions opened with assumed-role credentials.
    Session,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::DataApi => "data_api",
            BackendKind::Session => "session",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "data_api" | "data-api" | "polling" => Ok(BackendKind::DataApi),
            "session" | "connection" => Ok(BackendKind::Session),
            other => Err(other.to_string()),
        }
    }
}

// ── WarehouseConfig ──────────────────────────────────────────────

/// Redshift connection and execution settings.
///
/// Every key honours the `{SLUICE_PROFILE}_` prefix. `REDSHIFT_REGION` falls
/// back to `AWS_REGION` before using the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub backend: BackendKind,
    pub region: String,
    pub cluster_id: Option<String>,
    pub database: Option<String>,
    /// Database user for the Data API backend.
    pub db_user: Option<String>,
    /// Role assumed by the session backend.
    pub role_arn: Option<String>,
    /// Per-query deadline in seconds.
    pub query_timeout_seconds: u64,
    /// Maximum concurrently executing queries.
    pub max_in_flight: u32,
    /// Maximum pooled sessions (session backend only).
    pub session_pool_size: u32,
    /// Credentials are refreshed this many seconds before they expire.
    pub credential_skew_seconds: u64,
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_profiled(&active_profile())
    }

    pub fn from_env_profiled(profile: &str) -> Result<Self, ConfigError> {
        let backend_raw = profiled_env_or(profile, "SLUICE_BACKEND", "data_api");
        let backend = backend_raw.parse().map_err(|value| ConfigError::Invalid {
            key: "SLUICE_BACKEND".into(),
            value,
        })?;

        let region = profiled_env_opt(profile, "REDSHIFT_REGION")
            .or_else(|| profiled_env_opt(profile, "AWS_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(Self {
            backend,
            region,
            cluster_id: profiled_env_opt(profile, "REDSHIFT_CLUSTER_ID"),
            database: profiled_env_opt(profile, "REDSHIFT_DATABASE"),
            db_user: profiled_env_opt(profile, "REDSHIFT_DB_USER"),
            role_arn: profiled_env_opt(profile, "REDSHIFT_ROLE_ARN"),
            query_timeout_seconds: profiled_env_u64(profile, "SLUICE_QUERY_TIMEOUT_SECS", 300),
            max_in_flight: profiled_env_u32(profile, "SLUICE_MAX_IN_FLIGHT", 16).max(1),
            session_pool_size: profiled_env_u32(profile, "SLUICE_SESSION_POOL_SIZE", 4).max(1),
            credential_skew_seconds: profiled_env_u64(profile, "SLUICE_CREDENTIAL_SKEW_SECS", 60),
        })
    }

    /// Required keys that are unset for the selected backend.
    pub fn missing_keys(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.cluster_id.is_none() {
            missing.push("REDSHIFT_CLUSTER_ID".to_string());
        }
        if self.database.is_none() {
            missing.push("REDSHIFT_DATABASE".to_string());
        }
        match self.backend {
            BackendKind::DataApi if self.db_user.is_none() => {
                missing.push("REDSHIFT_DB_USER".to_string());
            }
            BackendKind::Session if self.role_arn.is_none() => {
                missing.push("REDSHIFT_ROLE_ARN".to_string());
            }
            _ => {}
        }
        missing
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = self.missing_keys();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn credential_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.credential_skew_seconds as i64)
    }

    pub(crate) fn cluster_id(&self) -> &str {
        self.cluster_id.as_deref().unwrap_or_default()
    }

    pub(crate) fn database(&self) -> &str {
        self.database.as_deref().unwrap_or_default()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "  warehouse:   backend={}, region={}, cluster={}, database={}",
            self.backend,
            self.region,
            self.cluster_id.as_deref().unwrap_or("(missing)"),
            self.database.as_deref().unwrap_or("(missing)"),
        );
        tracing::info!(
            "  limits:      timeout={}s, max_in_flight={}, session_pool={}",
            self.query_timeout_seconds,
            self.max_in_flight,
            self.session_pool_size,
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────
