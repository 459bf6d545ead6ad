//! Timestamp Authority Client
//!
//! Submits root hashes to an OpenTimestamps-style calendar server and hands
//! back the returned proof bytes.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::IntegrityError;

/// Pluggable anchor backend. The hasher only ever sees this trait; tests
/// script it, production talks to a calendar server.
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Anchor the given digest, returning the authority's proof bytes.
    /// A non-success response surfaces as an error, never an empty proof.
    async fn stamp(&self, digest: &[u8]) -> Result<Vec<u8>, IntegrityError>;
}

/// Calendar-server client speaking the plain HTTP digest-submission
/// protocol: POST the raw digest, receive the binary proof.
pub struct CalendarClient {
    calendar_url: String,
    http_client: Client,
}

impl CalendarClient {
    pub fn new(calendar_url: String) -> Self {
        Self {
            calendar_url,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl TimestampAuthority for CalendarClient {
    async fn stamp(&self, digest: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        let url = format!("{}/digest", self.calendar_url.trim_end_matches('/'));
        debug!("Submitting {} byte digest to {}", digest.len(), url);

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(digest.to_vec())
            .send()
            .await
            .map_err(|e| IntegrityError::ExternalService(format!("calendar request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IntegrityError::ExternalService(format!(
                "calendar server returned {}",
                response.status()
            )));
        }

        let proof = response
            .bytes()
            .await
            .map_err(|e| IntegrityError::ExternalService(format!("calendar response unreadable: {}", e)))?;

        info!("Received {} byte proof from calendar server", proof.len());
        Ok(proof.to_vec())
    }
}

/// Pull the calendar-server URL out of a proof's textual rendering. Proofs
/// embed the server's `https://…` address as ASCII inside the binary body.
pub fn extract_calendar_url(proof: &[u8]) -> Option<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        Regex::new(r"https://[A-Za-z0-9][A-Za-z0-9._/-]*").expect("static pattern")
    });

    let text = String::from_utf8_lossy(proof);
    re.find(&text).map(|m| m.as_str().to_string())
}
