//! Batch-or-interval forwarding, best effort.

use super::{Counters, ForwardStats, Transport};
use crate::core::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Accumulates items and posts them when the batch is full or the flush
/// interval has elapsed, whichever comes first.
///
/// A flush makes exactly one delivery attempt. The buffer is cleared
/// whether or not it succeeded, so an item is delivered at most once.
pub struct BufferedForwarder {
    transport: Arc<dyn Transport>,
    buffer: Vec<serde_json::Value>,
    batch_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
    counters: Counters,
}

impl BufferedForwarder {
    pub fn new(transport: Arc<dyn Transport>, batch_size: usize, flush_interval: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            transport,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            flush_interval,
            last_flush: Instant::now(),
            counters: Counters::default(),
        }
    }

    /// Buffer `item`, flushing if a threshold is reached.
    ///
    /// Only serialization can fail; delivery failures are logged.
    pub async fn push<T: Serialize>(&mut self, item: &T) -> Result<()> {
        self.buffer.push(serde_json::to_value(item)?);

        if self.buffer.len() >= self.batch_size || self.interval_elapsed() {
            self.flush().await;
        }
        Ok(())
    }

    /// Flush if the interval elapsed since the last flush.
    pub async fn tick(&mut self) {
        if !self.buffer.is_empty() && self.interval_elapsed() {
            self.flush().await;
        }
    }

    /// Post everything buffered in one call and clear the buffer.
    ///
    /// Returns the number of items delivered.
    pub async fn flush(&mut self) -> usize {
        self.last_flush = Instant::now();
        if self.buffer.is_empty() {
            return 0;
        }

        let items = std::mem::take(&mut self.buffer);
        let count = items.len();
        let payload = if self.batch_size == 1 && count == 1 {
            items.into_iter().next().unwrap_or_default()
        } else {
            serde_json::Value::Array(items)
        };

        self.counters.attempts(1);
        match self.transport.post(&payload).await {
            Ok(()) => {
                self.counters.delivered(count as u64);
                tracing::debug!("Forwarded {} items to {}", count, self.transport.target());
                count
            },
            Err(e) => {
                self.counters.dropped(count as u64);
                tracing::warn!(
                    "Dropping {} items, delivery to {} failed: {}",
                    count,
                    self.transport.target(),
                    e
                );
                0
            },
        }
    }

    /// Items waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn stats(&self) -> ForwardStats {
        self.counters.snapshot()
    }

    fn interval_elapsed(&self) -> bool {
        self.last_flush.elapsed() >= self.flush_interval
    }
}
