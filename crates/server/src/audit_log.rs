//! Request audit trail.
//!
//! Every request produces one [`AuditEntry`], emitted as a `tracing` event
//! with target `audit` and appended as a JSON line to the audit file when
//! one is configured. Raw API keys are never recorded: only whether one was presented and its
//! fingerprint.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which gate decided the request, and how.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Unauthorized,
    InvalidRequest,
    MethodNotFound,
    MissingQuery,
    Rejected,
    Succeeded,
    Failed,
    Cancelled,
}

/// One audited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic counter, assigned on record.
    pub entry_id: u64,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub request_id: Value,
    pub key_presented: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statement_kinds: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl AuditEntry {
    pub fn new(outcome: AuditOutcome, request_id: Value) -> Self {
        Self {
            entry_id: 0,
            timestamp: Utc::now(),
            outcome,
            request_id,
            key_presented: false,
            key_fingerprint: None,
            method: None,
            sql: None,
            statement_kinds: Vec::new(),
            backend: None,
            row_count: None,
            error_code: None,
            error_kind: None,
            error_message: None,
            duration_ms: 0,
        }
    }
}

pub struct AuditLog {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
    counter: AtomicU64,
}

impl AuditLog {
    /// Audit trail emitted through tracing only.
    pub fn tracing_only() -> Self {
        Self {
            path: None,
            file: None,
            counter: AtomicU64::new(1),
        }
    }

    /// Open (creating if needed) the JSON-lines audit file in append mode.
    pub fn open(path: Option<&Path>) -> std::io::Result<Self> {
        let mut log = Self::tracing_only();
        if let Some(path) = path {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            log.path = Some(path.to_path_buf());
            log.file = Some(Mutex::new(file));
        }
        Ok(log)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, mut entry: AuditEntry) {
        entry.entry_id = self.counter.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            target: "audit",
            entry_id = entry.entry_id,
            outcome = ?entry.outcome,
            request_id = %entry.request_id,
            key_presented = entry.key_presented,
            key_fingerprint = entry.key_fingerprint.as_deref().unwrap_or("-"),
            sql = entry.sql.as_deref().unwrap_or("-"),
            row_count = entry.row_count,
            error_code = entry.error_code,
            error = entry.error_message.as_deref().unwrap_or("-"),
            duration_ms = entry.duration_ms,
            "request audited"
        );

        if let Some(file) = &self.file {
            self.append_line(file, &entry);
        }
    }

    /// Number of entries recorded since startup.
    pub fn recorded(&self) -> u64 {
        self.counter.load(Ordering::Relaxed) - 1
    }

    fn append_line(&self, file: &Mutex<File>, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize audit entry: {}", e);
                return;
            }
        };
        let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(
                "Failed to append audit entry to {}: {}",
                self.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
                e
            );
        }
    }
}
