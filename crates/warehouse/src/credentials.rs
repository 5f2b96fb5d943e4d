//! Temporary credentials from an assumed role, cached with single-flight
//! refresh.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;

/// STS session name used for every role assumption.
pub const ROLE_SESSION_NAME: &str = "SluiceRedshiftSession";

/// Short-lived credentials for one assumed identity.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    /// Stale once `now + skew` reaches the expiry.
    pub fn is_stale(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now + skew >= self.expires_at
    }

    pub fn to_sdk_credentials(&self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            Some(self.session_token.clone()),
            Some(self.expires_at.into()),
            "sluice-assumed-role",
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of fresh temporary credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<Credentials, ExecutionError>;
}

// ── STS ──────────────────────────────────────────────────────────

/// Exchanges a role ARN for temporary credentials via STS `AssumeRole`.
pub struct StsCredentialProvider {
    client: aws_sdk_sts::Client,
    role_arn: String,
}

impl StsCredentialProvider {
    pub async fn new(region: &str, role_arn: String) -> Self {
        let aws_cfg = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_sts::config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_sts::Client::new(&aws_cfg),
            role_arn,
        }
    }
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn fetch(&self) -> Result<Credentials, ExecutionError> {
        let issued_at = Utc::now();
        let resp = self
            .client
            .assume_role()
            .role_arn(&self.role_arn)
            .role_session_name(ROLE_SESSION_NAME)
            .send()
            .await
            .map_err(|e| ExecutionError::from_sdk("AssumeRole", e))?;

        let creds = resp
            .credentials()
            .ok_or_else(|| ExecutionError::Connectivity("AssumeRole returned no credentials".into()))?;

        let expiration = creds.expiration();
        let expires_at = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| ExecutionError::Connectivity("AssumeRole returned an invalid expiration".into()))?;

        info!(role_arn = %self.role_arn, expires_at = %expires_at, "Assumed role");

        Ok(Credentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            issued_at,
            expires_at,
        })
    }
}

// ── Cache ────────────────────────────────────────────────────────

/// Serves cached credentials while fresh and refreshes them single-flight:
/// the lock is held across the fetch, so concurrent callers that find the
/// cache stale wait for one refresh instead of starting their own.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    skew: Duration,
    current: Mutex<Option<Credentials>>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn CredentialProvider>, skew: Duration) -> Self {
        Self {
            provider,
            skew,
            current: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<Credentials, ExecutionError> {
        let mut current = self.current.lock().await;

        if let Some(creds) = current.as_ref() {
            if !creds.is_stale(Utc::now(), self.skew) {
                return Ok(creds.clone());
            }
            debug!(expires_at = %creds.expires_at, "Cached credentials are stale, refreshing");
        }

        match self.provider.fetch().await {
            Ok(fresh) => {
                *current = Some(fresh.clone());
                Ok(fresh)
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed");
                *current = None;
                Err(e)
            }
        }
    }

    /// Drop the cached credentials so the next `get` refreshes.
    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }
}
