// Delivery provider interface
//
// The engine talks to the outside world through `NotificationProvider`.
// `HttpProvider` posts to a real delivery API; `LogProvider` backs dev
// environments with no provider configured; `ScriptedProvider` injects
// deterministic outcomes for tests (no randomness, so failures reproduce).

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::ConfirmationChannel;

/// The rendered message handed to a provider
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub addressee: String,
    pub channel: ConfirmationChannel,
    pub template_vars: HashMap<String, String>,
}

/// Provider-side failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Connection-level failure
    #[error("provider network error: {0}")]
    Network(String),

    /// The provider did not answer in time
    #[error("provider timed out")]
    Timeout,

    /// The provider rejected the message itself (bad address, bad payload)
    #[error("provider rejected message: {0}")]
    Rejected(String),

    /// HTTP-level failure
    #[error("provider returned HTTP {status}")]
    Http { status: u16 },
}

impl ProviderError {
    /// Whether this failure is worth retrying
    ///
    /// Network faults, timeouts, 5xx and 429 are transient. A rejection or
    /// other 4xx means the message will never succeed as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Rejected(_) => false,
            Self::Http { status } => matches!(status, 408 | 429 | 500..=599),
        }
    }
}

/// Outbound delivery seam
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Attempt one delivery
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError>;

    /// Provider name for logs and status output
    fn name(&self) -> &str;
}

/// Real transport: POST the message as JSON to a delivery API
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl NotificationProvider for HttpProvider {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            debug!("Provider accepted message (HTTP {})", status);
            return Ok(());
        }
        if status == 400 || status == 422 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(body));
        }
        Err(ProviderError::Http { status })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Dev fallback: log the send and report success
#[derive(Debug, Default)]
pub struct LogProvider;

#[async_trait]
impl NotificationProvider for LogProvider {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError> {
        info!(
            "Would deliver {:?} confirmation to {}",
            message.channel, message.addressee
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Deterministic provider double
///
/// Outcomes are scripted up front and consumed one per call; once the
/// script runs dry every call succeeds. Call counts and delivered
/// addressees are recorded for assertions.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<(), ProviderError>>>,
    calls: AtomicU64,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that fails `failures` times with the given error, then
    /// succeeds
    pub fn failing_then_ok(failures: u32, error: ProviderError) -> Self {
        let provider = Self::new();
        for _ in 0..failures {
            provider.push_outcome(Err(error.clone()));
        }
        provider
    }

    /// Append one scripted outcome
    pub fn push_outcome(&self, outcome: Result<(), ProviderError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Total send calls observed
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Addressees of successful sends, in order
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationProvider for ScriptedProvider {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.delivered
                .lock()
                .unwrap()
                .push(message.addressee.clone());
        }
        outcome
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
