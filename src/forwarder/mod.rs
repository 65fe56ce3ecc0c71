//! Delivery between pipeline stages.
//!
//! Both hops post JSON over HTTP through a [`Transport`]. Capture uses the
//! [`BufferedForwarder`] (batch or interval flush, one attempt); the
//! classifier queues records on a [`ForwardQueue`] whose task drives a
//! [`RetryingForwarder`] (bounded retry per
//! [`RetryPolicy`](crate::core::RetryPolicy)). Neither guarantees delivery.

pub mod buffered;
pub mod queue;
pub mod retrying;

pub use buffered::BufferedForwarder;
pub use queue::{Delivery, ForwardQueue};
pub use retrying::RetryingForwarder;

use crate::core::{PktwatchError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Posts one JSON payload to the next stage.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload`. Any non-2xx answer is an error.
    async fn post(&self, payload: &serde_json::Value) -> Result<()>;

    /// Where payloads go, for log lines.
    fn target(&self) -> &str;
}

/// [`Transport`] over reqwest with a per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PktwatchError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post(&self, payload: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PktwatchError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    PktwatchError::forward(format!("POST {} failed: {}", self.url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PktwatchError::forward(format!("POST {} returned {}", self.url, status)));
        }
        Ok(())
    }

    fn target(&self) -> &str {
        &self.url
    }
}

/// Snapshot of a forwarder's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Items accepted by the next stage
    pub delivered: u64,
    /// Items discarded after a failed delivery
    pub dropped: u64,
    /// Items whose failure was returned to the caller
    pub failed: u64,
    /// Delivery calls made, retries included
    pub attempts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
}

impl Counters {
    pub(crate) fn delivered(&self, items: u64) {
        self.delivered.fetch_add(items, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, items: u64) {
        self.dropped.fetch_add(items, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self, items: u64) {
        self.failed.fetch_add(items, Ordering::Relaxed);
    }

    pub(crate) fn attempts(&self, calls: u64) {
        self.attempts.fetch_add(calls, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ForwardStats {
        ForwardStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }
}
