//! Token Validation and Admin Login
//!
//! Both entry points sit behind their own `AttemptGuard` instance with
//! independent thresholds. Token validation does the cheap structural
//! rejection first, consults the guard, and only then touches the store.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::AdminConfig;
use crate::domain::{token_is_well_formed, Guest};
use crate::error::ApiError;
use crate::guard::AttemptGuard;
use crate::store::{GuestStore, StoreError};

/// Validates guest access tokens against the store, guarded per token
#[derive(Clone)]
pub struct TokenValidator {
    guard: AttemptGuard,
    store: Arc<dyn GuestStore>,
}

impl TokenValidator {
    pub fn new(guard: AttemptGuard, store: Arc<dyn GuestStore>) -> Self {
        Self { guard, store }
    }

    /// Resolve a token to its guest
    ///
    /// Order matters: structural rejection costs nothing and happens before
    /// the guard or the store sees the token. A store miss counts as a
    /// guard failure; a hit resets the token's attempt state.
    pub async fn validate(&self, token: &str) -> Result<Guest, ApiError> {
        if !token_is_well_formed(token) {
            return Err(ApiError::InvalidToken);
        }

        let decision = self.guard.check(token).await;
        if !decision.allowed {
            return Err(ApiError::RateLimited {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        match self.store.guest_by_token(token).await {
            Ok(Some(guest)) => {
                self.guard.record_success(token).await;
                Ok(guest)
            }
            Ok(None) => {
                self.guard.record_failure(token).await;
                debug!("Token lookup miss");
                Err(ApiError::TokenNotFound)
            }
            Err(err) => Err(map_store_error(err)),
        }
    }

    /// Guard handle, for operational inspection
    pub fn guard(&self) -> &AttemptGuard {
        &self.guard
    }
}

fn map_store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Unavailable(msg) => ApiError::Network(msg),
        other => ApiError::Server(other.to_string()),
    }
}

/// Admin login failures
#[derive(Debug, thiserror::Error)]
pub enum AdminLoginError {
    /// Too many attempts for this username
    #[error("too many login attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Unknown username or wrong password
    #[error("invalid credentials")]
    BadCredentials,
}

/// A granted admin session
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub session_token: Uuid,
}

/// Authenticates the administrative user, guarded per username
#[derive(Clone)]
pub struct AdminAuth {
    guard: AttemptGuard,
    config: AdminConfig,
}

impl AdminAuth {
    pub fn new(guard: AttemptGuard, config: AdminConfig) -> Self {
        Self { guard, config }
    }

    /// Verify credentials and issue a session
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AdminSession, AdminLoginError> {
        let decision = self.guard.check(username).await;
        if !decision.allowed {
            return Err(AdminLoginError::RateLimited {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        if self.credentials_match(username, password) {
            self.guard.record_success(username).await;
            Ok(AdminSession {
                session_token: Uuid::new_v4(),
            })
        } else {
            self.guard.record_failure(username).await;
            Err(AdminLoginError::BadCredentials)
        }
    }

    fn credentials_match(&self, username: &str, password: &str) -> bool {
        // An unset digest means admin login is disabled outright.
        if self.config.password_sha256.is_empty() {
            return false;
        }
        if username != self.config.username {
            return false;
        }
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        digest.eq_ignore_ascii_case(&self.config.password_sha256)
    }
}
