use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub calendar_url: String,
    pub notify_webhook_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub hash_interval_secs: u64,
    pub anchor_interval_secs: u64,
    pub notifier: NotifierConfig,
}

/// Tuning for the resilient notifier and its retry worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Delivery attempts per send before the message is parked.
    pub retry_attempts: u32,
    /// Fixed delay between those attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Consecutive qualifying failures before the breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long an open breaker rejects sends, in seconds.
    pub breaker_cooldown_secs: u64,
    /// Per-attempt timeout applied when the caller supplies none.
    pub send_timeout_secs: u64,
    /// Redeliveries the retry worker grants a parked message.
    pub max_redelivery_attempts: u32,
    /// Backoff base: the worker waits base^retry_count seconds.
    pub redelivery_backoff_base_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 500,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
            send_timeout_secs: 10,
            max_redelivery_attempts: 5,
            redelivery_backoff_base_secs: 2,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://ballot-anchor.db".to_string());

        let calendar_url = env::var("CALENDAR_URL")
            .unwrap_or_else(|_| "https://alice.btc.calendar.opentimestamps.org".to_string());

        let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL")
            .unwrap_or_else(|_| "http://localhost:9090/notifications".to_string());

        let server_host = env::var("SERVER_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        let hash_interval_secs = env::var("HASH_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        let anchor_interval_secs = env::var("ANCHOR_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()?;

        Ok(AppConfig {
            database_url,
            calendar_url,
            notify_webhook_url,
            server_host,
            server_port,
            hash_interval_secs,
            anchor_interval_secs,
            notifier: NotifierConfig::default(),
        })
    }
}
