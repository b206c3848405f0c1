//! Persistence Seam
//!
//! Guest and RSVP rows live in a relational store owned by another part of
//! the deployment; this crate talks to it through the traits below. The
//! store is the authority on the one-response-per-guest uniqueness
//! constraint; callers treat `DuplicateKey` on insert as a benign race.
//!
//! `MemoryStore` backs dev mode and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{ConfirmationChannel, Guest, RsvpResponse};

/// Store-layer failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Uniqueness constraint violated on insert
    #[error("row already exists for key {0}")]
    DuplicateKey(String),

    /// Row expected but missing
    #[error("no row for key {0}")]
    NotFound(String),

    /// Connectivity failure reaching the store
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// Store-side failure
    #[error("store error: {0}")]
    Internal(String),
}

/// Read access to guest records
#[async_trait]
pub trait GuestStore: Send + Sync {
    /// Look up a guest by access token
    async fn guest_by_token(&self, token: &str) -> Result<Option<Guest>, StoreError>;
}

/// Read/write access to RSVP rows
#[async_trait]
pub trait RsvpStore: Send + Sync {
    /// Fetch the RSVP owned by a guest token
    async fn rsvp_by_token(&self, token: &str) -> Result<Option<RsvpResponse>, StoreError>;

    /// Insert a new RSVP row; `DuplicateKey` if one already exists
    async fn insert_rsvp(&self, response: RsvpResponse) -> Result<(), StoreError>;

    /// Update the existing RSVP row for `response.guest_token`
    async fn update_rsvp(&self, response: RsvpResponse) -> Result<(), StoreError>;

    /// Flip a confirmation-sent flag after a successful delivery
    async fn mark_confirmation_sent(
        &self,
        token: &str,
        channel: ConfirmationChannel,
    ) -> Result<(), StoreError>;
}

/// In-memory store for dev mode and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    guests: Arc<RwLock<HashMap<String, Guest>>>,
    rsvps: Arc<RwLock<HashMap<String, RsvpResponse>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a guest (administrative import happens out of band in
    /// production)
    pub async fn add_guest(&self, guest: Guest) {
        let mut guests = self.guests.write().await;
        guests.insert(guest.access_token.clone(), guest);
    }

    /// Number of stored RSVP rows
    pub async fn rsvp_count(&self) -> usize {
        self.rsvps.read().await.len()
    }
}

#[async_trait]
impl GuestStore for MemoryStore {
    async fn guest_by_token(&self, token: &str) -> Result<Option<Guest>, StoreError> {
        let guests = self.guests.read().await;
        Ok(guests.get(token).cloned())
    }
}

#[async_trait]
impl RsvpStore for MemoryStore {
    async fn rsvp_by_token(&self, token: &str) -> Result<Option<RsvpResponse>, StoreError> {
        let rsvps = self.rsvps.read().await;
        Ok(rsvps.get(token).cloned())
    }

    async fn insert_rsvp(&self, response: RsvpResponse) -> Result<(), StoreError> {
        let mut rsvps = self.rsvps.write().await;
        if rsvps.contains_key(&response.guest_token) {
            return Err(StoreError::DuplicateKey(response.guest_token));
        }
        rsvps.insert(response.guest_token.clone(), response);
        Ok(())
    }

    async fn update_rsvp(&self, response: RsvpResponse) -> Result<(), StoreError> {
        let mut rsvps = self.rsvps.write().await;
        if !rsvps.contains_key(&response.guest_token) {
            return Err(StoreError::NotFound(response.guest_token));
        }
        rsvps.insert(response.guest_token.clone(), response);
        Ok(())
    }

    async fn mark_confirmation_sent(
        &self,
        token: &str,
        channel: ConfirmationChannel,
    ) -> Result<(), StoreError> {
        let mut rsvps = self.rsvps.write().await;
        let row = rsvps
            .get_mut(token)
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        match channel {
            ConfirmationChannel::Email => row.email_confirmation_sent = true,
            ConfirmationChannel::Message => row.message_confirmation_sent = true,
        }
        row.updated_at = Utc::now();
        Ok(())
    }
}
