//! Background Schedulers
//!
//! Two fixed-interval loops: the hashing scheduler finds ballots without a
//! hash row and hashes them concurrently; the anchor scheduler drives the
//! batch anchoring run. Both shut down cooperatively via a shared watch
//! channel, observed between ticks and during delays — in-flight work is
//! awaited, never aborted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::error::IntegrityError;
use crate::hashing::service::BallotHasher;

pub struct HashingScheduler {
    db: Database,
    hasher: Arc<BallotHasher>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl HashingScheduler {
    pub fn new(
        db: Database,
        hasher: Arc<BallotHasher>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            hasher,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Hashing scheduler started ({}s interval)",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *self.shutdown.borrow() {
                break;
            }
            self.tick().await;
        }
        info!("Hashing scheduler stopped");
    }

    /// One pass: discover un-hashed ballots, hash them all concurrently,
    /// await every task. A discovery failure skips to the next delay; a
    /// per-ballot failure is logged with its id and never aborts siblings.
    async fn tick(&self) {
        let unhashed = match self.find_unhashed().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to find un-hashed ballots: {}", e);
                return;
            }
        };

        info!("Found {} un-hashed ballots", unhashed.len());
        if unhashed.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for ballot_id in unhashed {
            let db = self.db.clone();
            let hasher = self.hasher.clone();
            tasks.spawn(async move {
                if let Err(e) = hash_one(&db, &hasher, ballot_id).await {
                    error!("Failed to hash ballot {}: {}", ballot_id, e);
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Set difference of ballot ids minus hashed ballot ids.
    async fn find_unhashed(&self) -> Result<Vec<Uuid>, sqlx::Error> {
        let ballot_ids = self.db.ballot_ids().await?;
        let hashed: HashSet<Uuid> = self.db.hashed_ballot_ids().await?.into_iter().collect();
        Ok(ballot_ids
            .into_iter()
            .filter(|id| !hashed.contains(id))
            .collect())
    }
}

async fn hash_one(
    db: &Database,
    hasher: &BallotHasher,
    ballot_id: Uuid,
) -> Result<(), IntegrityError> {
    match db.ballot_by_id(ballot_id).await? {
        Some(ballot) => hasher.hash_ballot(&ballot).await.map(|_| ()),
        None => {
            warn!("Ballot {} disappeared before hashing", ballot_id);
            Ok(())
        }
    }
}

/// Single serialized trigger for `hash_pending_batch`; an anchor failure is
/// logged and the next tick is the retry.
pub struct AnchorScheduler {
    hasher: Arc<BallotHasher>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl AnchorScheduler {
    pub fn new(
        hasher: Arc<BallotHasher>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            hasher,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Anchor scheduler started ({}s interval)",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *self.shutdown.borrow() {
                break;
            }
            if let Err(e) = self.hasher.hash_pending_batch().await {
                error!("Anchor run failed: {}", e);
            }
        }
        info!("Anchor scheduler stopped");
    }
}
