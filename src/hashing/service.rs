//! Ballot Hasher / Timestamp Service
//!
//! Drives each ballot through `Unhashed → Hashed(unanchored) →
//! Hashed(anchored)`: per-ballot content hashing on one side, batch Merkle
//! anchoring on the other.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::anchor::{extract_calendar_url, TimestampAuthority};
use crate::clock::Clock;
use crate::database::models::{Ballot, BallotHash, TimestampRecord};
use crate::database::Database;
use crate::error::IntegrityError;
use crate::hashing::merkle;
use crate::hashing::merkle::DeploymentDigest;
use crate::notify::ResilientNotifier;

pub struct BallotHasher {
    db: Database,
    authority: Arc<dyn TimestampAuthority>,
    notifier: Arc<ResilientNotifier>,
    clock: Arc<dyn Clock>,
}

impl BallotHasher {
    pub fn new(
        db: Database,
        authority: Arc<dyn TimestampAuthority>,
        notifier: Arc<ResilientNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            authority,
            notifier,
            clock,
        }
    }

    /// Content-hash one ballot and persist the hash record. Fails with a
    /// conflict naming the existing hash id if the ballot is already hashed.
    /// The pre-check is a fast path; the UNIQUE constraint on `ballot_id`
    /// is what actually guarantees at-most-one under a same-id race.
    pub async fn hash_ballot(&self, ballot: &Ballot) -> Result<BallotHash, IntegrityError> {
        if let Some(existing) = self.db.ballot_hash_for_ballot(ballot.id).await? {
            return Err(IntegrityError::HashConflict {
                ballot_id: ballot.id,
                existing_hash_id: existing.id,
            });
        }

        let hash = merkle::leaf_hash::<DeploymentDigest, _>(ballot)?;
        let now = self.clock.now_utc();
        let record = BallotHash {
            id: Uuid::new_v4(),
            ballot_id: ballot.id,
            hash_hex: hex::encode(&hash),
            hash,
            date_created: now,
            date_updated: now,
            timestamp_id: None,
        };

        if let Err(e) = self.db.insert_ballot_hash(&record).await {
            error!("Failed to persist hash for ballot {}: {}", ballot.id, e);
            return Err(e.into());
        }

        self.notifier
            .send_json(
                &json!({ "ballot_id": ballot.id, "hash": record }),
                Some("ballot-hashed"),
                Some(&ballot.id.to_string()),
            )
            .await?;

        debug!("Hashed ballot {} as {}", ballot.id, record.hash_hex);
        Ok(record)
    }

    /// Anchor every pending (unanchored) hash as one Merkle batch. Zero
    /// pending rows is a no-op: the authority is never asked to stamp an
    /// empty batch. Not safe to run concurrently with itself — the single
    /// anchor-loop trigger serializes invocations.
    pub async fn hash_pending_batch(&self) -> Result<Option<TimestampRecord>, IntegrityError> {
        let pending = self.db.unanchored_ballot_hashes().await?;
        if pending.is_empty() {
            debug!("No pending ballot hashes; skipping anchor run");
            return Ok(None);
        }

        let leaves: Vec<Vec<u8>> = pending.iter().map(|row| row.hash.clone()).collect();
        let Some(root) = merkle::merkle_root::<DeploymentDigest>(&leaves) else {
            // Unreachable: pending is non-empty.
            return Ok(None);
        };
        let root_hash = merkle::digest_once::<DeploymentDigest>(&root);

        let proof = match self.authority.stamp(&root_hash).await {
            Ok(proof) => proof,
            Err(e) => {
                error!(
                    "Timestamp authority failed for a batch of {} hashes: {}",
                    pending.len(),
                    e
                );
                return Err(e);
            }
        };

        let now = self.clock.now_utc();
        let record = TimestampRecord {
            id: Uuid::new_v4(),
            merkle_root: root,
            root_hash,
            proof_base64: BASE64.encode(&proof),
            calendar_url: extract_calendar_url(&proof),
            proof,
            date_created: now,
        };

        let hash_ids: Vec<Uuid> = pending.iter().map(|row| row.id).collect();
        if let Err(e) = self
            .db
            .insert_timestamp_and_link(&record, &hash_ids, now)
            .await
        {
            // Rolled back: the affected rows stay unanchored and are picked
            // up again next run.
            error!("Failed to persist timestamp {}: {}", record.id, e);
            return Err(e.into());
        }

        self.notifier
            .send_json(
                &json!({ "anchored": pending.len(), "timestamp": record }),
                Some("batch-anchored"),
                Some(&record.id.to_string()),
            )
            .await?;

        info!(
            "Anchored {} ballot hashes under timestamp {}",
            pending.len(),
            record.id
        );
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use crate::config::NotifierConfig;
    use crate::database::models::{Candidate, Election, Race};
    use crate::notify::{retry_queue, NotificationSink, OutboundMessage, SinkError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedAuthority {
        proof: Vec<u8>,
        calls: AtomicU32,
        fail: bool,
    }

    impl ScriptedAuthority {
        fn returning(proof: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                proof,
                calls: AtomicU32::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                proof: Vec::new(),
                calls: AtomicU32::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl TimestampAuthority for ScriptedAuthority {
        async fn stamp(&self, _digest: &[u8]) -> Result<Vec<u8>, IntegrityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(IntegrityError::ExternalService("calendar offline".into()))
            } else {
                Ok(self.proof.clone())
            }
        }
    }

    struct CollectingSink {
        seen: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn deliver(&self, message: &OutboundMessage) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn election() -> Election {
        Election {
            id: Uuid::new_v4(),
            name: "State Senate".to_string(),
            start: Utc.with_ymd_and_hms(2026, 4, 7, 7, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 4, 7, 19, 0, 0).unwrap(),
            races: vec![Race {
                id: Uuid::new_v4(),
                name: "District 12".to_string(),
                max_selections: 1,
                candidates: vec![Candidate {
                    id: Uuid::new_v4(),
                    name: "Eve Tran".to_string(),
                    party: None,
                    selected: true,
                }],
            }],
        }
    }

    fn ballot(election: &Election) -> Ballot {
        Ballot {
            id: Uuid::new_v4(),
            election: election.clone(),
            cast_at: election.start + chrono::Duration::hours(1),
        }
    }

    async fn hasher_with(
        authority: Arc<ScriptedAuthority>,
    ) -> (BallotHasher, Arc<CollectingSink>, Database) {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let (queue, _rx) = retry_queue();
        let sink = Arc::new(CollectingSink {
            seen: Mutex::new(Vec::new()),
        });
        let notifier = Arc::new(ResilientNotifier::new(
            sink.clone(),
            NotifierConfig::default(),
            queue,
        ));
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2026, 4, 7, 9, 0, 0).unwrap(),
        ));
        let hasher = BallotHasher::new(db.clone(), authority, notifier, clock);
        (hasher, sink, db)
    }

    #[tokio::test]
    async fn hashing_a_ballot_persists_and_notifies_once() {
        let authority = ScriptedAuthority::returning(b"proof".to_vec());
        let (hasher, sink, db) = hasher_with(authority).await;

        let election = election();
        db.insert_election(&election).await.unwrap();
        let ballot = ballot(&election);
        db.insert_ballot(&ballot).await.unwrap();

        let record = hasher.hash_ballot(&ballot).await.unwrap();
        assert_eq!(record.ballot_id, ballot.id);
        assert!(record.timestamp_id.is_none());
        assert_eq!(record.hash_hex, hex::encode(&record.hash));

        let stored = db.ballot_hash_for_ballot(ballot.id).await.unwrap().unwrap();
        assert_eq!(stored.id, record.id);

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].subject.as_deref(), Some("ballot-hashed"));
        assert!(seen[0].body.contains(&ballot.id.to_string()));
    }

    #[tokio::test]
    async fn rehashing_names_the_existing_hash_and_creates_nothing() {
        let authority = ScriptedAuthority::returning(b"proof".to_vec());
        let (hasher, sink, db) = hasher_with(authority).await;

        let election = election();
        db.insert_election(&election).await.unwrap();
        let ballot = ballot(&election);
        db.insert_ballot(&ballot).await.unwrap();

        let first = hasher.hash_ballot(&ballot).await.unwrap();
        let err = hasher.hash_ballot(&ballot).await.unwrap_err();

        match err {
            IntegrityError::HashConflict {
                ballot_id,
                existing_hash_id,
            } => {
                assert_eq!(ballot_id, ballot.id);
                assert_eq!(existing_hash_id, first.id);
            }
            other => panic!("expected HashConflict, got {:?}", other),
        }

        // Exactly one hash row and one notification.
        assert_eq!(db.hashed_ballot_ids().await.unwrap().len(), 1);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_links_every_pending_row_and_skips_anchored_ones() {
        let mut proof = b"\x00ots\x00".to_vec();
        proof.extend_from_slice(b"https://bob.btc.calendar.opentimestamps.org");
        let authority = ScriptedAuthority::returning(proof);
        let (hasher, sink, db) = hasher_with(authority).await;

        let election = election();
        db.insert_election(&election).await.unwrap();

        let first = ballot(&election);
        let second = ballot(&election);
        db.insert_ballot(&first).await.unwrap();
        db.insert_ballot(&second).await.unwrap();
        hasher.hash_ballot(&first).await.unwrap();
        hasher.hash_ballot(&second).await.unwrap();

        // First batch anchors both rows.
        let anchored = hasher.hash_pending_batch().await.unwrap().unwrap();
        let first_hash = db.ballot_hash_for_ballot(first.id).await.unwrap().unwrap();
        let second_hash = db.ballot_hash_for_ballot(second.id).await.unwrap().unwrap();
        assert_eq!(first_hash.timestamp_id, Some(anchored.id));
        assert_eq!(second_hash.timestamp_id, Some(anchored.id));
        assert_eq!(
            anchored.calendar_url.as_deref(),
            Some("https://bob.btc.calendar.opentimestamps.org")
        );

        // A later ballot forms its own batch; the anchored rows are untouched.
        let third = ballot(&election);
        db.insert_ballot(&third).await.unwrap();
        hasher.hash_ballot(&third).await.unwrap();

        let next = hasher.hash_pending_batch().await.unwrap().unwrap();
        assert_ne!(next.id, anchored.id);
        let third_hash = db.ballot_hash_for_ballot(third.id).await.unwrap().unwrap();
        assert_eq!(third_hash.timestamp_id, Some(next.id));
        let first_again = db.ballot_hash_for_ballot(first.id).await.unwrap().unwrap();
        assert_eq!(first_again.timestamp_id, Some(anchored.id));

        let subjects: Vec<Option<String>> = sink
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect();
        assert_eq!(
            subjects
                .iter()
                .filter(|s| s.as_deref() == Some("batch-anchored"))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn empty_batch_never_calls_the_authority() {
        let authority = ScriptedAuthority::returning(b"proof".to_vec());
        let (hasher, _sink, _db) = hasher_with(authority.clone()).await;

        let result = hasher.hash_pending_batch().await.unwrap();
        assert!(result.is_none());
        assert_eq!(authority.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authority_failure_leaves_rows_pending_for_the_next_run() {
        let authority = ScriptedAuthority::failing();
        let (hasher, _sink, db) = hasher_with(authority).await;

        let election = election();
        db.insert_election(&election).await.unwrap();
        let ballot = ballot(&election);
        db.insert_ballot(&ballot).await.unwrap();
        hasher.hash_ballot(&ballot).await.unwrap();

        let err = hasher.hash_pending_batch().await.unwrap_err();
        assert!(matches!(err, IntegrityError::ExternalService(_)));

        let row = db.ballot_hash_for_ballot(ballot.id).await.unwrap().unwrap();
        assert!(row.timestamp_id.is_none());
        assert_eq!(db.unanchored_ballot_hashes().await.unwrap().len(), 1);
    }
}
