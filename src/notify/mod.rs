//! Resilient Notification Module
//!
//! Delivers audit/notification messages without blocking callers or
//! silently dropping events: bounded retry composed with a circuit breaker,
//! an in-process retry queue for absorbed failures, and a worker that
//! redelivers with exponential backoff.

pub mod breaker;
pub mod notifier;
pub mod queue;
pub mod sink;
pub mod worker;

pub use breaker::{CircuitBreaker, CircuitState};
pub use notifier::ResilientNotifier;
pub use queue::{retry_queue, FailedMessage, RetryQueue};
pub use sink::{NotificationSink, OutboundMessage, SinkError, WebhookSink};
pub use worker::RetryWorker;
