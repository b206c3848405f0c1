//! RSVP Submission Pipeline
//!
//! Gates a submission behind token validation, validates the payload
//! fail-fast, writes exactly one authoritative response per guest token,
//! and queues a confirmation best-effort. The write path and the delivery
//! path fail independently: nothing in the notification or audit side
//! effects can roll back an accepted RSVP.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use chrono::Utc;

use crate::audit::AuditLog;
use crate::auth::TokenValidator;
use crate::domain::{
    email_is_well_formed, Guest, MealChoice, RsvpResponse, SubmissionReceipt, SubmissionRequest,
    ConfirmationChannel, MAX_DIETARY_NOTE_LEN,
};
use crate::error::ApiError;
use crate::metrics;
use crate::notify::{ConfirmationRequest, DeliveryEngine, Priority};
use crate::store::{RsvpStore, StoreError};

/// Payload fields after validation
#[derive(Debug)]
struct ValidatedSubmission {
    attending: bool,
    meal_choice: Option<MealChoice>,
    dietary_note: Option<String>,
    email_address: Option<String>,
}

/// The token-gated submission pipeline
#[derive(Clone)]
pub struct SubmissionPipeline {
    validator: TokenValidator,
    store: Arc<dyn RsvpStore>,
    engine: Arc<DeliveryEngine>,
    audit: AuditLog,
}

impl SubmissionPipeline {
    pub fn new(
        validator: TokenValidator,
        store: Arc<dyn RsvpStore>,
        engine: Arc<DeliveryEngine>,
        audit: AuditLog,
    ) -> Self {
        Self {
            validator,
            store,
            engine,
            audit,
        }
    }

    /// Validate and persist a guest's RSVP
    ///
    /// Resubmission updates the existing row in place and returns the same
    /// submission id; the id identifies the guest's RSVP lifecycle, not
    /// each write.
    pub async fn submit(&self, payload: &SubmissionRequest) -> Result<SubmissionReceipt, ApiError> {
        let result = self.submit_inner(payload).await;

        match &result {
            Ok(_) => {
                metrics::RSVP_SUBMISSIONS_TOTAL
                    .with_label_values(&["accepted"])
                    .inc();
                self.audit_attempt(&payload.guest_token, true, None).await;
            }
            Err(err) => {
                metrics::RSVP_SUBMISSIONS_TOTAL
                    .with_label_values(&["rejected"])
                    .inc();
                if matches!(err, ApiError::RateLimited { .. }) {
                    metrics::TOKEN_LOCKOUTS_TOTAL.inc();
                }
                self.audit_attempt(&payload.guest_token, false, Some(err.code()))
                    .await;
            }
        }
        result
    }

    async fn submit_inner(
        &self,
        payload: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, ApiError> {
        let guest = self.validator.validate(&payload.guest_token).await?;
        let validated = validate_payload(payload)?;

        let submission_id = self.write_response(payload, &validated).await?;
        info!(
            "Recorded RSVP (attending: {}) for submission {}",
            validated.attending, submission_id
        );

        let confirmation_queued = self
            .queue_confirmation(&guest, payload, &validated)
            .await;

        Ok(SubmissionReceipt {
            submission_id,
            confirmation_queued,
        })
    }

    /// Upsert-by-guest-token; the store's uniqueness constraint is the
    /// authority, the read here is only a fast path
    async fn write_response(
        &self,
        payload: &SubmissionRequest,
        validated: &ValidatedSubmission,
    ) -> Result<Uuid, ApiError> {
        let existing = self
            .store
            .rsvp_by_token(&payload.guest_token)
            .await
            .map_err(map_store_error)?;

        match existing {
            Some(current) => {
                let updated = self.merge_row(current, validated);
                let id = updated.submission_id;
                self.store
                    .update_rsvp(updated)
                    .await
                    .map_err(map_store_error)?;
                Ok(id)
            }
            None => {
                let row = self.fresh_row(&payload.guest_token, validated);
                let id = row.submission_id;
                match self.store.insert_rsvp(row).await {
                    Ok(()) => Ok(id),
                    // Lost an insert race: the other write owns the row now.
                    // Re-read and update it in place, keeping its id.
                    Err(StoreError::DuplicateKey(_)) => {
                        let current = self
                            .store
                            .rsvp_by_token(&payload.guest_token)
                            .await
                            .map_err(map_store_error)?
                            .ok_or(ApiError::DuplicateSubmission)?;
                        let updated = self.merge_row(current, validated);
                        let id = updated.submission_id;
                        self.store
                            .update_rsvp(updated)
                            .await
                            .map_err(map_store_error)?;
                        Ok(id)
                    }
                    Err(err) => Err(map_store_error(err)),
                }
            }
        }
    }

    fn fresh_row(&self, token: &str, validated: &ValidatedSubmission) -> RsvpResponse {
        let now = Utc::now();
        RsvpResponse {
            guest_token: token.to_string(),
            attending: validated.attending,
            meal_choice: validated.meal_choice,
            dietary_note: validated.dietary_note.clone(),
            email_address: validated.email_address.clone(),
            email_confirmation_sent: false,
            message_confirmation_sent: false,
            submission_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn merge_row(&self, current: RsvpResponse, validated: &ValidatedSubmission) -> RsvpResponse {
        RsvpResponse {
            attending: validated.attending,
            meal_choice: validated.meal_choice,
            dietary_note: validated.dietary_note.clone(),
            email_address: validated.email_address.clone(),
            updated_at: Utc::now(),
            ..current
        }
    }

    /// Best-effort enqueue; a refusal is logged and never fails the write
    async fn queue_confirmation(
        &self,
        guest: &Guest,
        payload: &SubmissionRequest,
        validated: &ValidatedSubmission,
    ) -> bool {
        if !payload.wants_email_confirmation {
            return false;
        }
        let Some(email) = &validated.email_address else {
            return false;
        };

        let mut template_vars = HashMap::new();
        template_vars.insert("guest_name".to_string(), guest.display_name.clone());
        template_vars.insert("attending".to_string(), validated.attending.to_string());
        if let Some(meal) = validated.meal_choice {
            template_vars.insert("meal_choice".to_string(), meal.as_str().to_string());
        }

        let receipt = self
            .engine
            .enqueue(ConfirmationRequest {
                guest_token: payload.guest_token.clone(),
                addressee: email.clone(),
                channel: ConfirmationChannel::Email,
                template_vars,
                priority: Priority::High,
            })
            .await;

        if !receipt.accepted {
            warn!("Confirmation refused by the queue; RSVP write stands");
        }
        receipt.accepted
    }

    async fn audit_attempt(&self, token: &str, success: bool, code: Option<&str>) {
        if let Err(err) = self.audit.try_record(token, success, code).await {
            warn!("Audit trail write failed (ignored): {}", err);
        }
    }
}

fn validate_payload(payload: &SubmissionRequest) -> Result<ValidatedSubmission, ApiError> {
    if payload.guest_name.trim().is_empty() {
        return Err(ApiError::validation("guest_name", "must not be empty"));
    }

    let Some(attending) = payload.attending else {
        return Err(ApiError::validation(
            "attending",
            "must be answered true or false",
        ));
    };

    let meal_choice = match payload.meal_choice.as_deref() {
        Some(raw) => match MealChoice::parse(raw) {
            Some(choice) => Some(choice),
            None => {
                return Err(ApiError::validation("meal_choice", "unknown meal choice"));
            }
        },
        None => None,
    };
    if attending && meal_choice.is_none() {
        return Err(ApiError::validation(
            "meal_choice",
            "required when attending",
        ));
    }

    let email_address = match payload.email_address.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(email) => {
            if !email_is_well_formed(email) {
                return Err(ApiError::validation(
                    "email_address",
                    "not a valid email address",
                ));
            }
            Some(email.to_string())
        }
    };

    let dietary_note = match payload.dietary_restrictions.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(note) => {
            if note.chars().count() > MAX_DIETARY_NOTE_LEN {
                return Err(ApiError::validation(
                    "dietary_restrictions",
                    "must be at most 500 characters",
                ));
            }
            Some(note.to_string())
        }
    };

    Ok(ValidatedSubmission {
        attending,
        meal_choice,
        dietary_note,
        email_address,
    })
}

fn map_store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::DuplicateKey(_) => ApiError::DuplicateSubmission,
        StoreError::Unavailable(msg) => ApiError::Network(msg),
        other => ApiError::Server(other.to_string()),
    }
}
