//! Submission Audit Trail
//!
//! Bounded in-memory record of submission attempts. Appending is a
//! non-blocking side effect of the pipeline: callers attempt the write and
//! ignore failure with a logged warning, so the swallowing is visible
//! rather than silent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Retained audit entries; oldest are dropped past this
pub const MAX_AUDIT_ENTRIES: usize = 10_000;

/// One audited submission attempt
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the attempt happened
    pub timestamp: DateTime<Utc>,

    /// Guest token the attempt was made for
    pub guest_token: String,

    /// Whether the submission succeeded
    pub success: bool,

    /// Stable error code on failure
    pub error_code: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The trail rejected the entry
    #[error("audit trail unavailable: {0}")]
    Unavailable(String),
}

/// Bounded in-memory audit trail
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, dropping the oldest past the cap
    pub async fn try_record(
        &self,
        guest_token: &str,
        success: bool,
        error_code: Option<&str>,
    ) -> Result<(), AuditError> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            guest_token: guest_token.to_string(),
            success,
            error_code: error_code.map(str::to_string),
        };

        let mut entries = self.entries.write().await;
        entries.push(entry);
        if entries.len() > MAX_AUDIT_ENTRIES {
            let excess = entries.len() - MAX_AUDIT_ENTRIES;
            entries.drain(0..excess);
        }
        Ok(())
    }

    /// Entries for one guest token, oldest first
    pub async fn entries_for(&self, guest_token: &str) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.guest_token == guest_token)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
