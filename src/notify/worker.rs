//! Retry Worker
//!
//! Long-running drain of the retry queue: waits out an exponential backoff
//! per message, re-attempts a single delivery, and either discards,
//! re-enqueues at the tail, or drops the message once it has used up its
//! redelivery budget.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::config::NotifierConfig;
use crate::notify::notifier::{DeliveryFailure, ResilientNotifier};
use crate::notify::queue::{FailedMessage, RetryQueue};

pub struct RetryWorker {
    notifier: Arc<ResilientNotifier>,
    rx: mpsc::UnboundedReceiver<FailedMessage>,
    queue: RetryQueue,
    config: NotifierConfig,
    shutdown: watch::Receiver<bool>,
}

impl RetryWorker {
    pub fn new(
        notifier: Arc<ResilientNotifier>,
        rx: mpsc::UnboundedReceiver<FailedMessage>,
        queue: RetryQueue,
        config: NotifierConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            notifier,
            rx,
            queue,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("Notification retry worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let parked = tokio::select! {
                _ = self.shutdown.changed() => break,
                parked = self.rx.recv() => match parked {
                    Some(parked) => parked,
                    None => break,
                },
            };
            self.process(parked).await;
        }
        info!("Notification retry worker stopped");
    }

    async fn process(&mut self, mut parked: FailedMessage) {
        if parked.retry_count >= self.config.max_redelivery_attempts {
            error!(
                "Dropping notification after {} redelivery attempts (subject: {:?})",
                parked.retry_count, parked.message.subject
            );
            return;
        }

        let backoff = self.backoff_for(parked.retry_count);
        tokio::select! {
            _ = self.shutdown.changed() => {
                // Mid-backoff shutdown: hand the message back rather than lose it.
                self.queue.push(parked);
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }

        let timeout = self.notifier.default_timeout();
        match self.notifier.try_deliver(&parked.message, timeout).await {
            Ok(()) => {
                debug!(
                    "Redelivered notification on retry {} (subject: {:?})",
                    parked.retry_count + 1,
                    parked.message.subject
                );
            }
            Err(DeliveryFailure::Unexpected(err)) => {
                // Redelivering the same payload cannot fix a rejection.
                error!("Dropping rejected notification: {}", err);
            }
            Err(DeliveryFailure::Qualifying(reason)) => {
                parked.retry_count += 1;
                if parked.retry_count >= self.config.max_redelivery_attempts {
                    error!(
                        "Dropping notification after {} redelivery attempts ({})",
                        parked.retry_count, reason
                    );
                } else {
                    parked.failed_at = chrono::Utc::now();
                    self.queue.push(parked);
                }
            }
        }
    }

    /// base^retry_count seconds plus a little jitter so a burst of parked
    /// messages does not redeliver in lockstep.
    fn backoff_for(&self, retry_count: u32) -> Duration {
        let seconds = self
            .config
            .redelivery_backoff_base_secs
            .saturating_pow(retry_count);
        let jitter_ms = rand::thread_rng().gen_range(0..250);
        Duration::from_secs(seconds) + Duration::from_millis(jitter_ms)
    }
}
