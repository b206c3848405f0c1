//! In-Memory Notification Queue
//!
//! Holds queued confirmation notifications until the delivery engine
//! drains them. Higher priority is served first; ties break on creation
//! order (FIFO within a priority class). The queue is capacity-bounded:
//! enqueues beyond capacity are refused, not silently dropped later.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::ConfirmationChannel;

/// Priority classes for queued notifications
///
/// Confirmations for a just-submitted RSVP go out high; the lower classes
/// exist for bulk operations the design anticipates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Delivery lifecycle of a queued notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for its next-attempt time
    Pending,
    /// Handed to the provider
    Sending,
    /// Terminal: delivered
    Delivered,
    /// Terminal: attempts exhausted or permanently rejected
    Exhausted,
}

/// A notification waiting for delivery
#[derive(Debug, Clone)]
pub struct QueuedNotification {
    /// Queue-internal id
    pub id: Uuid,

    /// Destination address (email or phone, per channel)
    pub addressee: String,

    /// Channel whose confirmation flag this delivery flips
    pub channel: ConfirmationChannel,

    /// Rendered template variables (guest name, event details)
    pub template_vars: HashMap<String, String>,

    /// Priority class
    pub priority: Priority,

    /// Failed attempts so far
    pub attempts: u32,

    /// Attempts allowed before the item is exhausted
    pub max_attempts: u32,

    /// Earliest time the next attempt may run
    pub next_attempt_at: Instant,

    /// Enqueue time (for FIFO tie-break and observability)
    pub created_at: DateTime<Utc>,

    /// Correlation key: the guest token whose RSVP row is updated on
    /// success
    pub guest_token: String,

    /// Lifecycle state
    pub state: DeliveryState,

    /// Monotonic enqueue sequence, tie-break within a priority class
    seq: u64,
}

/// Result of an enqueue call
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueReceipt {
    /// False when the queue refused the item (at capacity)
    pub accepted: bool,

    /// 1-indexed position among queued items, in drain order
    pub position: usize,
}

/// Capacity-bounded priority queue
#[derive(Debug)]
pub struct NotificationQueue {
    items: Vec<QueuedNotification>,
    capacity: usize,
    next_seq: u64,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Add an item, returning whether it was accepted and its position in
    /// drain order
    pub fn enqueue(&mut self, mut item: QueuedNotification) -> EnqueueReceipt {
        if self.items.len() >= self.capacity {
            return EnqueueReceipt {
                accepted: false,
                position: 0,
            };
        }

        item.seq = self.next_seq;
        self.next_seq += 1;

        let ahead = self
            .items
            .iter()
            .filter(|other| Self::drains_before(other, &item))
            .count();

        self.items.push(item);
        EnqueueReceipt {
            accepted: true,
            position: ahead + 1,
        }
    }

    /// Remove and return the best item whose next-attempt time has passed
    pub fn take_next_eligible(&mut self, now: Instant) -> Option<QueuedNotification> {
        let mut best: Option<usize> = None;
        for (idx, item) in self.items.iter().enumerate() {
            if item.next_attempt_at > now {
                continue;
            }
            match best {
                None => best = Some(idx),
                Some(current) if Self::drains_before(item, &self.items[current]) => {
                    best = Some(idx)
                }
                Some(_) => {}
            }
        }
        best.map(|idx| self.items.swap_remove(idx))
    }

    /// Put an item back after a reschedule
    pub fn reinsert(&mut self, item: QueuedNotification) {
        self.items.push(item);
    }

    /// Earliest next-attempt time among queued items
    pub fn earliest_next_attempt(&self) -> Option<Instant> {
        self.items.iter().map(|item| item.next_attempt_at).min()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn drains_before(a: &QueuedNotification, b: &QueuedNotification) -> bool {
        (a.priority, std::cmp::Reverse(a.seq)) > (b.priority, std::cmp::Reverse(b.seq))
    }
}

impl QueuedNotification {
    /// Build a fresh pending notification
    pub fn new(
        addressee: &str,
        channel: ConfirmationChannel,
        template_vars: HashMap<String, String>,
        priority: Priority,
        max_attempts: u32,
        guest_token: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            addressee: addressee.to_string(),
            channel,
            template_vars,
            priority,
            attempts: 0,
            max_attempts,
            next_attempt_at: Instant::now(),
            created_at: Utc::now(),
            guest_token: guest_token.to_string(),
            state: DeliveryState::Pending,
            seq: 0,
        }
    }
}
