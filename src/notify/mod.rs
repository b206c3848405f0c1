//! Notification Queue and Delivery Engine
//!
//! Confirmation notifications are accepted into a priority-ordered
//! in-memory queue and drained by a single background task that enforces
//! three nested send windows (per-minute, per-hour, burst), retries
//! transient provider failures with capped exponential backoff, and
//! reports terminal failures.
//!
//! # Architecture
//!
//! ```text
//! Submission Pipeline --enqueue--> NotificationQueue
//!                                       |
//!                              DeliveryEngine (tick + nudge)
//!                               |        |         |
//!                          SendWindows  RetryPolicy  NotificationProvider
//! ```

pub mod engine;
pub mod limits;
pub mod provider;
pub mod queue;
pub mod retry;

pub use engine::{ConfirmationRequest, DeliveryEngine, QueueStatus};
pub use limits::{SendWindows, WindowDecision, WindowsSnapshot};
pub use provider::{
    HttpProvider, LogProvider, NotificationProvider, OutboundMessage, ProviderError,
    ScriptedProvider,
};
pub use queue::{DeliveryState, EnqueueReceipt, NotificationQueue, Priority, QueuedNotification};
pub use retry::{RetryDecision, RetryPolicy};
