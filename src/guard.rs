//! Attempt Guard
//!
//! Generic sliding-window attempt counter with lockout, keyed by an
//! arbitrary string. Two independent instances protect guest-token
//! validation and admin login, each with its own thresholds.
//!
//! The guard never fails: every operation returns a decision and callers
//! branch on `allowed`. State is process-local and owned exclusively by the
//! guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::GuardSettings;

/// Attempt state for one key
#[derive(Debug, Clone)]
struct AttemptRecord {
    /// Attempts recorded in the current window
    count: u32,

    /// Time of the most recent attempt
    last_attempt: Instant,

    /// Active lockout expiry, if any
    locked_until: Option<Instant>,
}

/// Outcome of a guard check
#[derive(Debug, Clone)]
pub struct GuardDecision {
    /// Whether the operation may proceed
    pub allowed: bool,

    /// Attempts left before lockout
    pub attempts_remaining: u32,

    /// How long until the lockout expires (when denied)
    pub retry_after: Option<Duration>,
}

impl GuardDecision {
    fn allowed(attempts_remaining: u32) -> Self {
        Self {
            allowed: true,
            attempts_remaining,
            retry_after: None,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            attempts_remaining: 0,
            retry_after: Some(retry_after),
        }
    }

    /// Retry-after rounded up to whole seconds, for API responses
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after
            .map(|d| d.as_secs_f64().ceil() as u64)
            .unwrap_or(0)
    }
}

/// Sliding-window attempt guard with lockout
#[derive(Debug, Clone)]
pub struct AttemptGuard {
    settings: GuardSettings,
    records: Arc<RwLock<HashMap<String, AttemptRecord>>>,
}

impl AttemptGuard {
    pub fn new(settings: GuardSettings) -> Self {
        Self {
            settings,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check whether an operation keyed by `key` may proceed
    pub async fn check(&self, key: &str) -> GuardDecision {
        let now = Instant::now();
        let records = self.records.read().await;

        let Some(record) = records.get(key) else {
            return GuardDecision::allowed(self.settings.max_attempts);
        };

        if let Some(locked_until) = record.locked_until {
            if now < locked_until {
                return GuardDecision::denied(locked_until - now);
            }
            // Lockout has passed; the stale record is replaced on the next
            // failure and ignored here.
            return GuardDecision::allowed(self.settings.max_attempts);
        }

        if self.window_expired(record, now) {
            return GuardDecision::allowed(self.settings.max_attempts);
        }

        let remaining = self.settings.max_attempts.saturating_sub(record.count);
        GuardDecision::allowed(remaining)
    }

    /// Record a failed attempt for `key`, locking it out past the threshold
    pub async fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut records = self.records.write().await;

        let record = records.entry(key.to_string()).or_insert(AttemptRecord {
            count: 0,
            last_attempt: now,
            locked_until: None,
        });

        // An expired lockout or an elapsed window starts a fresh count.
        let expired_lockout = record
            .locked_until
            .map(|until| now >= until)
            .unwrap_or(false);
        if expired_lockout || self.window_expired(record, now) {
            record.count = 0;
            record.locked_until = None;
        }

        record.count += 1;
        record.last_attempt = now;

        if record.locked_until.is_none() && record.count >= self.settings.max_attempts {
            record.locked_until = Some(now + self.settings.lockout());
            debug!(
                "Attempt guard locked out key after {} failures (lockout {}s)",
                record.count, self.settings.lockout_secs
            );
        }
    }

    /// Record a qualifying success: the key's state is cleared entirely
    pub async fn record_success(&self, key: &str) {
        let mut records = self.records.write().await;
        records.remove(key);
    }

    /// Whether `key` is currently locked out
    pub async fn is_locked(&self, key: &str) -> bool {
        !self.check(key).await.allowed
    }

    /// Number of keys with live attempt state
    pub async fn tracked_keys(&self) -> usize {
        self.records.read().await.len()
    }

    fn window_expired(&self, record: &AttemptRecord, now: Instant) -> bool {
        now.duration_since(record.last_attempt) > self.settings.window()
    }
}
