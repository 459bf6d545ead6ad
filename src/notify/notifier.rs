//! Resilient Notifier
//!
//! Wraps the notification sink in a composed policy: bounded retry with a
//! fixed delay, a circuit breaker, and a per-attempt timeout. A delivery
//! that still fails is parked on the retry queue and `send` returns
//! normally — notification failure never reaches the critical path.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::NotifierConfig;
use crate::error::IntegrityError;
use crate::notify::breaker::CircuitBreaker;
use crate::notify::queue::{FailedMessage, RetryQueue};
use crate::notify::sink::{NotificationSink, OutboundMessage, SinkError};

/// Outcome of a single delivery attempt, split by how the policy reacts.
pub(crate) enum DeliveryFailure {
    /// Timeout or transport failure: retried, breaker-counted, absorbed.
    Qualifying(String),
    /// Anything else is a caller bug and propagates.
    Unexpected(IntegrityError),
}

pub struct ResilientNotifier {
    sink: Arc<dyn NotificationSink>,
    breaker: CircuitBreaker,
    queue: RetryQueue,
    config: NotifierConfig,
}

impl ResilientNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, config: NotifierConfig, queue: RetryQueue) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        );
        Self {
            sink,
            breaker,
            queue,
            config,
        }
    }

    /// Serialize any value to its canonical JSON text and send it. A
    /// serialization failure is unexpected and propagates.
    pub async fn send_json<T: Serialize>(
        &self,
        value: &T,
        subject: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<(), IntegrityError> {
        let body = serde_json::to_string(value)?;
        let mut message = OutboundMessage::text(body);
        if let Some(subject) = subject {
            message = message.with_subject(subject);
        }
        if let Some(correlation_id) = correlation_id {
            message = message.with_correlation_id(correlation_id);
        }
        self.send(message).await
    }

    /// Send with the default per-attempt timeout.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), IntegrityError> {
        self.send_with_timeout(message, None).await
    }

    /// Send with an explicit per-attempt timeout; `None` applies the
    /// configured default. Returns `Ok` on delivery *and* on absorbed
    /// failure; only unexpected errors surface.
    pub async fn send_with_timeout(
        &self,
        message: OutboundMessage,
        timeout: Option<Duration>,
    ) -> Result<(), IntegrityError> {
        let per_attempt = timeout.unwrap_or(Duration::from_secs(self.config.send_timeout_secs));
        let mut attempt = 0;

        loop {
            if !self.breaker.try_acquire() {
                warn!("Notification circuit open; parking message for redelivery");
                self.park(message);
                return Ok(());
            }

            attempt += 1;
            match self.try_deliver(&message, per_attempt).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(DeliveryFailure::Qualifying(reason)) => {
                    self.breaker.record_failure();
                    if attempt >= self.config.retry_attempts {
                        warn!(
                            "Notification failed after {} attempts ({}); parking for redelivery",
                            attempt, reason
                        );
                        self.park(message);
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(DeliveryFailure::Unexpected(err)) => return Err(err),
            }
        }
    }

    /// One raw delivery attempt under a timeout, with no retry, breaker
    /// bookkeeping or absorption. The retry worker redelivers through this
    /// so an exhausted message cannot re-enter the queue at retry count 0.
    pub(crate) async fn try_deliver(
        &self,
        message: &OutboundMessage,
        timeout: Duration,
    ) -> Result<(), DeliveryFailure> {
        match tokio::time::timeout(timeout, self.sink.deliver(message)).await {
            Err(_) => Err(DeliveryFailure::Qualifying(format!(
                "delivery timed out after {:?}",
                timeout
            ))),
            Ok(Err(SinkError::Transport(reason))) => Err(DeliveryFailure::Qualifying(reason)),
            Ok(Err(err @ SinkError::Rejected(_))) => Err(DeliveryFailure::Unexpected(
                IntegrityError::Notification(err.to_string()),
            )),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.config.send_timeout_secs)
    }

    fn park(&self, message: OutboundMessage) {
        self.queue.push(FailedMessage::new(message));
    }
}
