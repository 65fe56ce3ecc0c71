//! Bounded-retry forwarding.

use super::{Counters, ForwardStats, Transport};
use crate::core::{Outcome, Result, RetryPolicy};
use serde::Serialize;
use std::sync::Arc;

/// Delivers one item at a time, retrying per its [`RetryPolicy`].
pub struct RetryingForwarder {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    counters: Counters,
}

impl RetryingForwarder {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            counters: Counters::default(),
        }
    }

    /// Deliver `item`.
    ///
    /// `Ok(Outcome::Dropped)` means every attempt failed and the policy
    /// dropped the item; an error is returned only under the `fail` action.
    pub async fn forward<T: Serialize>(&self, item: &T) -> Result<Outcome<()>> {
        let payload = serde_json::to_value(item)?;
        let what = format!("delivery to {}", self.transport.target());

        let result = self
            .policy
            .run(&what, || {
                self.counters.attempts(1);
                self.transport.post(&payload)
            })
            .await;

        match &result {
            Ok(Outcome::Delivered { .. }) => self.counters.delivered(1),
            Ok(Outcome::Dropped { .. }) => self.counters.dropped(1),
            Err(_) => self.counters.failed(1),
        }
        result
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> ForwardStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OnExhausted, PktwatchError};
    use crate::forwarder::mock::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_delivers_after_transient_failures() {
        let transport = Arc::new(MockTransport::failing(2));
        let forwarder = RetryingForwarder::new(transport.clone(), policy(5));

        let outcome = forwarder.forward(&json!({"id": 1})).await.unwrap();
        assert_eq!(outcome, Outcome::Delivered { value: (), attempts: 3 });
        assert_eq!(transport.payloads.lock().len(), 1);

        let stats = forwarder.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.attempts, 3);
    }

    #[tokio::test]
    async fn test_drops_after_exhaustion() {
        let transport = Arc::new(MockTransport::failing(usize::MAX));
        let forwarder = RetryingForwarder::new(transport.clone(), policy(3));

        let outcome = forwarder.forward(&json!({"id": 1})).await.unwrap();
        assert!(outcome.is_dropped());
        assert_eq!(transport.calls(), 3);
        assert_eq!(forwarder.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_fail_action_surfaces_error() {
        let transport = Arc::new(MockTransport::failing(usize::MAX));
        let forwarder = RetryingForwarder::new(transport, policy(2).on_exhausted(OnExhausted::Fail));

        let err = forwarder.forward(&json!({"id": 1})).await.unwrap_err();
        assert!(matches!(err, PktwatchError::Forward(_)));
        assert_eq!(forwarder.stats().failed, 1);
    }
}
