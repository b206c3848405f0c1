//! Core Data Model
//!
//! Guest and RSVP entities plus the guest-facing submission payload.
//! Guests are created out of band (administrative import); this crate only
//! reads them. An RSVP row is owned by exactly one guest token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of the free-text dietary note
pub const MAX_DIETARY_NOTE_LEN: usize = 500;

/// Access token length bounds (structural check, applied before any lookup)
pub const TOKEN_MIN_LEN: usize = 8;
pub const TOKEN_MAX_LEN: usize = 64;

/// A guest invited to the event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    /// Stable guest id
    pub id: Uuid,

    /// Display name shown on the RSVP form
    pub display_name: String,

    /// Optional contact phone number
    pub phone: Option<String>,

    /// Unique access token granting this guest entry to their RSVP
    pub access_token: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Guest {
    /// Create a new guest with a fresh id
    pub fn new(display_name: &str, access_token: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            phone: None,
            access_token: access_token.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Meal choices offered to attending guests
///
/// Unknown values submitted by a client are rejected during validation,
/// never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealChoice {
    Chicken,
    Beef,
    Fish,
    Vegetarian,
    Vegan,
    Kids,
}

impl MealChoice {
    /// Parse a wire value into a meal choice
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chicken" => Some(Self::Chicken),
            "beef" => Some(Self::Beef),
            "fish" => Some(Self::Fish),
            "vegetarian" => Some(Self::Vegetarian),
            "vegan" => Some(Self::Vegan),
            "kids" => Some(Self::Kids),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chicken => "chicken",
            Self::Beef => "beef",
            Self::Fish => "fish",
            Self::Vegetarian => "vegetarian",
            Self::Vegan => "vegan",
            Self::Kids => "kids",
        }
    }
}

/// Confirmation channels tracked independently on an RSVP row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationChannel {
    /// Email confirmation
    Email,
    /// Messaging-channel confirmation (SMS or similar)
    Message,
}

/// A guest's authoritative RSVP
///
/// At most one row exists per guest token. A second submission updates the
/// existing row; the submission id is stable across edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsvpResponse {
    /// Owning guest token
    pub guest_token: String,

    /// Whether the guest is attending
    pub attending: bool,

    /// Meal choice (present iff attending)
    pub meal_choice: Option<MealChoice>,

    /// Free-text dietary note
    pub dietary_note: Option<String>,

    /// Contact email, if supplied
    pub email_address: Option<String>,

    /// Email confirmation delivered
    pub email_confirmation_sent: bool,

    /// Messaging-channel confirmation delivered
    pub message_confirmation_sent: bool,

    /// Server-generated id identifying this guest's RSVP lifecycle
    pub submission_id: Uuid,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Guest-facing submission payload
///
/// `attending` is deliberately an `Option`: an absent field is a validation
/// error, not a default of false.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRequest {
    pub guest_token: String,
    pub guest_name: String,
    pub attending: Option<bool>,
    pub meal_choice: Option<String>,
    pub dietary_restrictions: Option<String>,
    pub email_address: Option<String>,
    #[serde(default)]
    pub wants_email_confirmation: bool,
}

/// Result of a successful submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    /// Stable id for this guest's RSVP
    pub submission_id: Uuid,

    /// Whether a confirmation notification was queued
    pub confirmation_queued: bool,
}

/// Structural access-token check, run before the guard or store is touched
///
/// Tokens are opaque: 8-64 chars drawn from `[A-Za-z0-9_-]`.
pub fn token_is_well_formed(token: &str) -> bool {
    if token.len() < TOKEN_MIN_LEN || token.len() > TOKEN_MAX_LEN {
        return false;
    }
    token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Structural email check: one `@` with a non-empty local part and a dotted
/// domain, no whitespace. Deliverability is the provider's problem.
pub fn email_is_well_formed(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}
