//! Timestamp Anchoring Module
//!
//! Records Merkle roots with an external timestamp authority so every
//! anchored batch of ballot hashes has a proof of existence.

pub mod client;

pub use client::{extract_calendar_url, CalendarClient, TimestampAuthority};
