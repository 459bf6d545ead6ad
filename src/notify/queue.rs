//! Retry Queue
//!
//! In-process FIFO of messages whose delivery was absorbed by the notifier.
//! The retry worker drains it; re-enqueued messages go to the tail, so
//! ordering across retries is not preserved.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::error;

use crate::notify::sink::OutboundMessage;

/// A message the notifier could not deliver, parked for redelivery.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    pub message: OutboundMessage,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl FailedMessage {
    pub fn new(message: OutboundMessage) -> Self {
        Self {
            message,
            failed_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Sender half of the retry queue. Cloned into the notifier (for parking)
/// and the worker (for tail re-enqueues).
#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<FailedMessage>,
}

impl RetryQueue {
    pub fn push(&self, message: FailedMessage) {
        // Only fails when the worker is gone, i.e. during shutdown.
        if self.tx.send(message).is_err() {
            error!("Retry queue closed; notification lost");
        }
    }
}

pub fn retry_queue() -> (RetryQueue, mpsc::UnboundedReceiver<FailedMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RetryQueue { tx }, rx)
}
