//! Delivery Engine
//!
//! Owns the notification queue and the send windows exclusively. A single
//! background drain task runs on a fixed tick and is nudged whenever an
//! item is enqueued while the drainer is idle; concurrent nudges coalesce
//! into a no-op when a pass is already active.
//!
//! Per-item lifecycle: Pending -> Sending -> Delivered, or back to Pending
//! via a backoff reschedule, or Exhausted once attempts run out or the
//! provider rejects the message outright. Exhausted items are logged and
//! counted, then dropped; there is no dead-letter persistence at this
//! scale.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DeliverySettings;
use crate::domain::ConfirmationChannel;
use crate::metrics;
use crate::notify::limits::{SendWindows, WindowDecision, WindowsSnapshot};
use crate::notify::provider::{NotificationProvider, OutboundMessage, ProviderError};
use crate::notify::queue::{
    DeliveryState, EnqueueReceipt, NotificationQueue, Priority, QueuedNotification,
};
use crate::notify::retry::{RetryDecision, RetryPolicy};
use crate::store::RsvpStore;

/// A confirmation the pipeline wants delivered
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Guest token whose RSVP row is updated on success
    pub guest_token: String,

    /// Destination address
    pub addressee: String,

    /// Channel whose confirmation flag this delivery flips
    pub channel: ConfirmationChannel,

    /// Rendered template variables
    pub template_vars: HashMap<String, String>,

    /// Priority class
    pub priority: Priority,
}

/// Operational snapshot of the engine
///
/// Queue contents are deliberately not exposed, only lengths, the
/// draining flag and the raw window counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub draining: bool,
    pub windows: WindowsSnapshot,
    pub delivered_total: u64,
    pub exhausted_total: u64,
    pub provider: String,
}

/// Background delivery engine
pub struct DeliveryEngine {
    settings: DeliverySettings,
    retry: RetryPolicy,
    queue: Mutex<NotificationQueue>,
    windows: SendWindows,
    provider: Arc<dyn NotificationProvider>,
    store: Arc<dyn RsvpStore>,
    draining: AtomicBool,
    nudge: Notify,
    delivered_total: AtomicU64,
    exhausted_total: AtomicU64,
}

impl DeliveryEngine {
    pub fn new(
        settings: DeliverySettings,
        windows: SendWindows,
        provider: Arc<dyn NotificationProvider>,
        store: Arc<dyn RsvpStore>,
    ) -> Self {
        let retry = RetryPolicy::from_settings(&settings);
        Self {
            queue: Mutex::new(NotificationQueue::new(settings.queue_capacity)),
            retry,
            settings,
            windows,
            provider,
            store,
            draining: AtomicBool::new(false),
            nudge: Notify::new(),
            delivered_total: AtomicU64::new(0),
            exhausted_total: AtomicU64::new(0),
        }
    }

    /// Queue a confirmation for delivery and nudge the drainer
    pub async fn enqueue(&self, request: ConfirmationRequest) -> EnqueueReceipt {
        let item = QueuedNotification::new(
            &request.addressee,
            request.channel,
            request.template_vars,
            request.priority,
            self.settings.max_attempts,
            &request.guest_token,
        );

        let receipt = {
            let mut queue = self.queue.lock().await;
            let receipt = queue.enqueue(item);
            metrics::QUEUE_DEPTH.set(queue.len() as i64);
            receipt
        };

        if receipt.accepted {
            debug!(
                "Queued {:?} confirmation at position {}",
                request.channel, receipt.position
            );
            self.nudge.notify_one();
        } else {
            warn!(
                "Notification queue at capacity; refused {:?} confirmation",
                request.channel
            );
        }
        receipt
    }

    /// Start the background drain task
    pub fn spawn_drainer(self: Arc<Self>) -> JoinHandle<()> {
        let engine = self;
        tokio::spawn(async move {
            let mut tick = interval(engine.settings.drain_tick());
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = engine.nudge.notified() => {}
                }
                engine.drain().await;
            }
        })
    }

    /// Run one drain pass; concurrent calls coalesce into a no-op
    pub async fn drain(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        self.drain_queue().await;
        self.draining.store(false, Ordering::SeqCst);
    }

    /// Operational snapshot
    pub async fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.queue.lock().await.len(),
            draining: self.draining.load(Ordering::SeqCst),
            windows: self.windows.snapshot(),
            delivered_total: self.delivered_total.load(Ordering::SeqCst),
            exhausted_total: self.exhausted_total.load(Ordering::SeqCst),
            provider: self.provider.name().to_string(),
        }
    }

    /// Drain until the queue is empty, one item at a time
    async fn drain_queue(&self) {
        loop {
            let now = Instant::now();
            let item = {
                let mut queue = self.queue.lock().await;
                if queue.is_empty() {
                    break;
                }
                match queue.take_next_eligible(now) {
                    Some(item) => {
                        metrics::QUEUE_DEPTH.set(queue.len() as i64);
                        item
                    }
                    None => {
                        // Everything is rescheduled into the future; sleep
                        // toward the earliest slot, re-checking at least
                        // once per tick for newly enqueued work.
                        let earliest = queue.earliest_next_attempt();
                        drop(queue);
                        let Some(earliest) = earliest else { break };
                        let wait = earliest
                            .saturating_duration_since(now)
                            .min(self.settings.drain_tick());
                        sleep(wait).await;
                        continue;
                    }
                }
            };

            match self.windows.check() {
                WindowDecision::Allowed => {}
                WindowDecision::Blocked { window, remaining } => {
                    debug!(
                        "Send window {:?} full; rescheduling for {:?}",
                        window, remaining
                    );
                    let mut item = item;
                    item.state = DeliveryState::Pending;
                    item.next_attempt_at = Instant::now() + remaining;
                    {
                        let mut queue = self.queue.lock().await;
                        queue.reinsert(item);
                        metrics::QUEUE_DEPTH.set(queue.len() as i64);
                    }
                    sleep(remaining.min(self.settings.drain_tick())).await;
                    continue;
                }
            }

            self.attempt(item).await;
        }
    }

    /// One attempt-and-classify cycle for a single item
    async fn attempt(&self, mut item: QueuedNotification) {
        item.state = DeliveryState::Sending;
        let message = OutboundMessage {
            addressee: item.addressee.clone(),
            channel: item.channel,
            template_vars: item.template_vars.clone(),
        };

        let outcome = match timeout(
            self.settings.provider_timeout(),
            self.provider.send(&message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        match outcome {
            Ok(()) => {
                item.state = DeliveryState::Delivered;
                self.windows.record_send();
                self.delivered_total.fetch_add(1, Ordering::SeqCst);
                metrics::SEND_ATTEMPTS_TOTAL
                    .with_label_values(&["delivered"])
                    .inc();
                metrics::NOTIFICATIONS_DELIVERED_TOTAL.inc();
                info!(
                    "Delivered {:?} confirmation after {} retries",
                    item.channel, item.attempts
                );

                if let Err(err) = self
                    .store
                    .mark_confirmation_sent(&item.guest_token, item.channel)
                    .await
                {
                    warn!("Delivered but could not record confirmation flag: {}", err);
                }

                // Breathe between sends even when the provider is happy.
                sleep(self.settings.inter_send_delay()).await;
            }
            Err(err) if err.is_retryable() => {
                item.attempts += 1;
                metrics::SEND_ATTEMPTS_TOTAL
                    .with_label_values(&["retryable_failure"])
                    .inc();
                match self.retry.next_delay(item.attempts) {
                    RetryDecision::Retry(delay) => {
                        debug!(
                            "Attempt {} of {} failed ({}); retrying in {:?}",
                            item.attempts, item.max_attempts, err, delay
                        );
                        item.state = DeliveryState::Pending;
                        item.next_attempt_at = Instant::now() + delay;
                        let mut queue = self.queue.lock().await;
                        queue.reinsert(item);
                        metrics::QUEUE_DEPTH.set(queue.len() as i64);
                    }
                    RetryDecision::GiveUp => self.exhaust(item, &err),
                }
            }
            Err(err) => {
                // Permanent rejection: no point consuming the remaining
                // attempts.
                metrics::SEND_ATTEMPTS_TOTAL
                    .with_label_values(&["permanent_failure"])
                    .inc();
                self.exhaust(item, &err);
            }
        }
    }

    fn exhaust(&self, mut item: QueuedNotification, err: &ProviderError) {
        item.state = DeliveryState::Exhausted;
        self.exhausted_total.fetch_add(1, Ordering::SeqCst);
        metrics::NOTIFICATIONS_EXHAUSTED_TOTAL.inc();
        warn!(
            "Dropping {:?} confirmation for {} after {} attempts: {}",
            item.channel, item.addressee, item.attempts.max(1), err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::domain::{Guest, MealChoice, RsvpResponse};
    use crate::notify::provider::ScriptedProvider;
    use crate::store::{MemoryStore, RsvpStore};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn fast_settings() -> DeliverySettings {
        DeliverySettings {
            max_attempts: 3,
            base_backoff_ms: 20,
            max_backoff_ms: 1_000,
            inter_send_delay_ms: 0,
            provider_timeout_ms: 500,
            queue_capacity: 16,
            drain_tick_ms: 50,
            provider_url: None,
        }
    }

    fn open_windows() -> SendWindows {
        SendWindows::new(&RateLimitSettings {
            sends_per_minute: 1_000,
            sends_per_hour: 10_000,
            burst_size: 1_000,
            burst_cooldown_secs: 1,
        })
    }

    async fn store_with_rsvp(token: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.add_guest(Guest::new("Test Guest", token)).await;
        store
            .insert_rsvp(RsvpResponse {
                guest_token: token.to_string(),
                attending: true,
                meal_choice: Some(MealChoice::Vegetarian),
                dietary_note: None,
                email_address: Some("a@b.com".to_string()),
                email_confirmation_sent: false,
                message_confirmation_sent: false,
                submission_id: Uuid::new_v4(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn request(token: &str) -> ConfirmationRequest {
        ConfirmationRequest {
            guest_token: token.to_string(),
            addressee: "a@b.com".to_string(),
            channel: ConfirmationChannel::Email,
            template_vars: HashMap::new(),
            priority: Priority::High,
        }
    }

    #[tokio::test]
    async fn test_drain_delivers_and_flips_flag() {
        let store = store_with_rsvp("abc12345").await;
        let provider = Arc::new(ScriptedProvider::new());
        let engine = DeliveryEngine::new(
            fast_settings(),
            open_windows(),
            provider.clone(),
            Arc::new(store.clone()),
        );

        let receipt = engine.enqueue(request("abc12345")).await;
        assert!(receipt.accepted);
        assert_eq!(receipt.position, 1);

        engine.drain().await;

        assert_eq!(provider.calls(), 1);
        let row = store.rsvp_by_token("abc12345").await.unwrap().unwrap();
        assert!(row.email_confirmation_sent);
        assert!(!row.message_confirmation_sent);

        let status = engine.status().await;
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.delivered_total, 1);
        assert!(!status.draining);
    }

    #[tokio::test]
    async fn test_retry_twice_then_succeed() {
        let store = store_with_rsvp("abc12345").await;
        let provider = Arc::new(ScriptedProvider::failing_then_ok(
            2,
            ProviderError::Http { status: 500 },
        ));
        let settings = fast_settings();
        let retry = RetryPolicy::from_settings(&settings);
        let floor = retry.nominal_delay(1) + retry.nominal_delay(2);

        let engine = DeliveryEngine::new(
            settings,
            open_windows(),
            provider.clone(),
            Arc::new(store.clone()),
        );
        engine.enqueue(request("abc12345")).await;

        let started = Instant::now();
        engine.drain().await;
        let elapsed = started.elapsed();

        assert_eq!(provider.calls(), 3);
        assert!(
            elapsed >= floor,
            "elapsed {elapsed:?} must cover the first two backoff delays {floor:?}"
        );
        let row = store.rsvp_by_token("abc12345").await.unwrap().unwrap();
        assert!(row.email_confirmation_sent);
        assert_eq!(engine.status().await.delivered_total, 1);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let store = store_with_rsvp("abc12345").await;
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..5 {
            provider.push_outcome(Err(ProviderError::Network("refused".into())));
        }

        let engine = DeliveryEngine::new(
            fast_settings(),
            open_windows(),
            provider.clone(),
            Arc::new(store.clone()),
        );
        let before = engine.status().await.queue_length;
        engine.enqueue(request("abc12345")).await;
        engine.drain().await;

        // Three attempts, then the item is dropped and the queue returns to
        // its pre-enqueue length.
        assert_eq!(provider.calls(), 3);
        let status = engine.status().await;
        assert_eq!(status.queue_length, before);
        assert_eq!(status.exhausted_total, 1);
        assert_eq!(status.delivered_total, 0);

        let row = store.rsvp_by_token("abc12345").await.unwrap().unwrap();
        assert!(!row.email_confirmation_sent);
    }

    #[tokio::test]
    async fn test_permanent_rejection_exhausts_immediately() {
        let store = store_with_rsvp("abc12345").await;
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_outcome(Err(ProviderError::Rejected("malformed address".into())));

        let engine = DeliveryEngine::new(
            fast_settings(),
            open_windows(),
            provider.clone(),
            Arc::new(store.clone()),
        );
        engine.enqueue(request("abc12345")).await;
        engine.drain().await;

        assert_eq!(provider.calls(), 1);
        let status = engine.status().await;
        assert_eq!(status.exhausted_total, 1);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn test_minute_ceiling_reschedules_not_drops() {
        let store = store_with_rsvp("abc12345").await;
        let provider = Arc::new(ScriptedProvider::new());

        // One send per shrunken "minute"; second item must wait a window.
        let windows = SendWindows::with_periods(
            &RateLimitSettings {
                sends_per_minute: 1,
                sends_per_hour: 1_000,
                burst_size: 1_000,
                burst_cooldown_secs: 1,
            },
            Duration::from_millis(100),
            Duration::from_secs(3_600),
        );

        let engine = DeliveryEngine::new(
            fast_settings(),
            windows,
            provider.clone(),
            Arc::new(store.clone()),
        );
        engine.enqueue(request("abc12345")).await;
        engine.enqueue(request("abc12345")).await;

        let started = Instant::now();
        engine.drain().await;
        let elapsed = started.elapsed();

        // Both delivered, none dropped, and the second waited out the window.
        assert_eq!(provider.calls(), 2);
        let status = engine.status().await;
        assert_eq!(status.delivered_total, 2);
        assert_eq!(status.exhausted_total, 0);
        assert_eq!(status.queue_length, 0);
        assert!(elapsed >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable() {
        let store = store_with_rsvp("abc12345").await;

        // Provider that never answers within the engine's timeout.
        struct StalledProvider;
        #[async_trait::async_trait]
        impl NotificationProvider for StalledProvider {
            async fn send(&self, _message: &OutboundMessage) -> Result<(), ProviderError> {
                sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            fn name(&self) -> &str {
                "stalled"
            }
        }

        let mut settings = fast_settings();
        settings.provider_timeout_ms = 20;
        settings.max_attempts = 2;
        settings.base_backoff_ms = 5;

        let engine = DeliveryEngine::new(
            settings,
            open_windows(),
            Arc::new(StalledProvider),
            Arc::new(store.clone()),
        );
        engine.enqueue(request("abc12345")).await;
        engine.drain().await;

        let status = engine.status().await;
        assert_eq!(status.exhausted_total, 1);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn test_concurrent_drains_coalesce() {
        let store = store_with_rsvp("abc12345").await;
        let provider = Arc::new(ScriptedProvider::new());
        let engine = Arc::new(DeliveryEngine::new(
            fast_settings(),
            open_windows(),
            provider.clone(),
            Arc::new(store),
        ));
        engine.enqueue(request("abc12345")).await;

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.drain().await })
        };
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.drain().await })
        };
        let _ = futures::join!(first, second);

        // Exactly one pass processed the item.
        assert_eq!(provider.calls(), 1);
        assert_eq!(engine.status().await.delivered_total, 1);
    }

    #[tokio::test]
    async fn test_queue_capacity_refuses_enqueue() {
        let store = store_with_rsvp("abc12345").await;
        let mut settings = fast_settings();
        settings.queue_capacity = 1;
        let engine = DeliveryEngine::new(
            settings,
            open_windows(),
            Arc::new(ScriptedProvider::new()),
            Arc::new(store),
        );

        assert!(engine.enqueue(request("abc12345")).await.accepted);
        let refused = engine.enqueue(request("abc12345")).await;
        assert!(!refused.accepted);
    }
}
