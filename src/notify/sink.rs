//! Notification Sink
//!
//! The transport behind the resilient notifier. The shipped implementation
//! posts messages as JSON to a configured webhook endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// One audit/notification message on its way out of the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: String,
    pub subject: Option<String>,
    pub correlation_id: Option<String>,
    pub queue: Option<String>,
}

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            subject: None,
            correlation_id: None,
            queue: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// The transport failed; retrying may help. Qualifies for the retry and
    /// circuit-breaker policy.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The sink refused the message itself; retrying the same payload
    /// cannot succeed. Treated as unexpected by the notifier.
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), SinkError>;
}

/// Posts each message as a JSON document to a webhook URL.
pub struct WebhookSink {
    endpoint: String,
    http_client: Client,
}

impl WebhookSink {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), SinkError> {
        debug!(
            "Delivering notification to {} (subject: {:?})",
            self.endpoint, message.subject
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(SinkError::Rejected(format!("webhook returned {}", status)))
        } else {
            Err(SinkError::Transport(format!("webhook returned {}", status)))
        }
    }
}
