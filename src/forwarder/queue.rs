//! Background delivery for the classification hop.
//!
//! The parser answers its caller once frames are classified; records then
//! wait here while a single task pushes them through a
//! [`RetryingForwarder`] in arrival order.

use super::{ForwardStats, RetryingForwarder};
use crate::core::{OnExhausted, PktwatchError, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Job {
    Deliver {
        payload: serde_json::Value,
        done: Option<oneshot::Sender<Result<()>>>,
    },
    Barrier(oneshot::Sender<()>),
}

/// Handle to the delivery task. Clones share the same task.
#[derive(Clone)]
pub struct ForwardQueue {
    jobs: mpsc::UnboundedSender<Job>,
    forwarder: Arc<RetryingForwarder>,
}

/// A record accepted by [`ForwardQueue::submit`], resolved once the
/// forwarder is done with it.
pub struct Delivery(oneshot::Receiver<Result<()>>);

impl Delivery {
    pub async fn wait(self) -> Result<()> {
        self.0.await.map_err(|_| worker_gone())?
    }
}

impl ForwardQueue {
    /// Start the delivery task on the current runtime.
    pub fn spawn(forwarder: RetryingForwarder) -> Self {
        let forwarder = Arc::new(forwarder);
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(forwarder.clone(), rx));
        Self { jobs, forwarder }
    }

    /// Queue `item` without waiting. An exhausted item is handled by the
    /// policy alone.
    pub fn enqueue<T: Serialize>(&self, item: &T) -> Result<()> {
        self.push(item, None)
    }

    /// Queue `item` and return a handle resolving to its delivery result.
    pub fn submit<T: Serialize>(&self, item: &T) -> Result<Delivery> {
        let (done, rx) = oneshot::channel();
        self.push(item, Some(done))?;
        Ok(Delivery(rx))
    }

    fn push<T: Serialize>(&self, item: &T, done: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        let payload = serde_json::to_value(item)?;
        self.jobs
            .send(Job::Deliver { payload, done })
            .map_err(|_| worker_gone())
    }

    /// Resolve once everything queued so far has been delivered or given up on.
    pub async fn flushed(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.jobs.send(Job::Barrier(done)).map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())
    }

    /// Whether callers should wait for each delivery.
    pub fn waits_for_delivery(&self) -> bool {
        self.forwarder.policy().on_exhausted == OnExhausted::Fail
    }

    pub fn stats(&self) -> ForwardStats {
        self.forwarder.stats()
    }
}

fn worker_gone() -> PktwatchError {
    PktwatchError::forward("delivery task stopped")
}

async fn deliver(forwarder: Arc<RetryingForwarder>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Deliver { payload, done } => {
                let result = forwarder.forward(&payload).await.map(|_| ());
                match (done, result) {
                    (Some(done), result) => {
                        // the caller may have gone away; the record was still handled
                        let _ = done.send(result);
                    },
                    (None, Err(e)) => tracing::error!("Queued record lost: {}", e),
                    (None, Ok(())) => {},
                }
            },
            Job::Barrier(done) => {
                let _ = done.send(());
            },
        }
    }
    tracing::debug!("Delivery queue closed");
}
