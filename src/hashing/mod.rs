//! Ballot Hashing Pipeline
//!
//! Content-hashes accepted ballots, batches pending hashes into Merkle
//! trees, and anchors batch roots with the external timestamp authority.

pub mod merkle;
pub mod scheduler;
pub mod service;

pub use scheduler::{AnchorScheduler, HashingScheduler};
pub use service::BallotHasher;
