// Prometheus metrics for rsvpd monitoring
//
// Exposed on the /metrics HTTP endpoint:
// - RSVP submissions by outcome (counter)
// - Token validation lockouts (counter)
// - Delivery attempts by outcome (counter)
// - Delivered / exhausted notifications (counters)
// - Queue depth (gauge)

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Submission metrics
    pub static ref RSVP_SUBMISSIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("rsvp_submissions_total", "RSVP submissions by outcome"),
        &["outcome"]
    ).expect("Failed to create submissions metric");

    pub static ref TOKEN_LOCKOUTS_TOTAL: IntCounter = IntCounter::new(
        "token_lockouts_total",
        "Token validation attempts refused by the attempt guard"
    ).expect("Failed to create lockouts metric");

    // Delivery metrics
    pub static ref SEND_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("send_attempts_total", "Provider send attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create send attempts metric");

    pub static ref NOTIFICATIONS_DELIVERED_TOTAL: IntCounter = IntCounter::new(
        "notifications_delivered_total",
        "Notifications delivered since process start"
    ).expect("Failed to create delivered metric");

    pub static ref NOTIFICATIONS_EXHAUSTED_TOTAL: IntCounter = IntCounter::new(
        "notifications_exhausted_total",
        "Notifications dropped after exhausting their attempts"
    ).expect("Failed to create exhausted metric");

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "notification_queue_depth",
        "Notifications currently queued"
    ).expect("Failed to create queue depth metric");
}

/// Initialize metrics registry - must be called once at process startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RSVP_SUBMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKEN_LOCKOUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SEND_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATIONS_DELIVERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATIONS_EXHAUSTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
