pub mod models;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::database::models::{Ballot, BallotHash, Election, TimestampRecord};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Database { pool })
    }

    /// Single-connection in-memory database, used by tests.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Database { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(include_str!("../migrations/001_initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_election(&self, election: &Election) -> Result<(), sqlx::Error> {
        let definition = serde_json::to_string(election).map_err(decode_err)?;
        sqlx::query(
            r#"
            INSERT INTO elections (id, name, start_at, end_at, definition, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(election.id.to_string())
        .bind(&election.name)
        .bind(election.start)
        .bind(election.end)
        .bind(definition)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn election_by_id(&self, id: Uuid) -> Result<Option<Election>, sqlx::Error> {
        let row = sqlx::query("SELECT definition FROM elections WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: String = row.try_get("definition")?;
                let election = serde_json::from_str(&definition).map_err(decode_err)?;
                Ok(Some(election))
            }
            None => Ok(None),
        }
    }

    pub async fn insert_ballot(&self, ballot: &Ballot) -> Result<(), sqlx::Error> {
        let snapshot = serde_json::to_string(&ballot.election).map_err(decode_err)?;
        sqlx::query(
            r#"
            INSERT INTO ballots (id, election_id, snapshot, cast_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(ballot.id.to_string())
        .bind(ballot.election.id.to_string())
        .bind(snapshot)
        .bind(ballot.cast_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ballot_by_id(&self, id: Uuid) -> Result<Option<Ballot>, sqlx::Error> {
        let row = sqlx::query("SELECT id, snapshot, cast_at FROM ballots WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| ballot_from_row(&row)).transpose()
    }

    pub async fn ballot_ids(&self) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query("SELECT id FROM ballots")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_uuid(&row.try_get::<String, _>("id")?))
            .collect()
    }

    /// Ids of ballots that already have a hash row.
    pub async fn hashed_ballot_ids(&self) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query("SELECT ballot_id FROM ballot_hashes")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_uuid(&row.try_get::<String, _>("ballot_id")?))
            .collect()
    }

    pub async fn insert_ballot_hash(&self, record: &BallotHash) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ballot_hashes (id, ballot_id, hash, hash_hex, date_created, date_updated, timestamp_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.ballot_id.to_string())
        .bind(&record.hash)
        .bind(&record.hash_hex)
        .bind(record.date_created)
        .bind(record.date_updated)
        .bind(record.timestamp_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ballot_hash_for_ballot(
        &self,
        ballot_id: Uuid,
    ) -> Result<Option<BallotHash>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, ballot_id, hash, hash_hex, date_created, date_updated, timestamp_id
            FROM ballot_hashes
            WHERE ballot_id = ?1
            "#,
        )
        .bind(ballot_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| ballot_hash_from_row(&row)).transpose()
    }

    /// All hash rows not yet linked to a Timestamp, newest first. This is
    /// the batch `hash_pending_batch` anchors.
    pub async fn unanchored_ballot_hashes(&self) -> Result<Vec<BallotHash>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, ballot_id, hash, hash_hex, date_created, date_updated, timestamp_id
            FROM ballot_hashes
            WHERE timestamp_id IS NULL
            ORDER BY date_created DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ballot_hash_from_row).collect()
    }

    /// Insert the Timestamp row and link every given hash row to it, in one
    /// transaction. The Timestamp must be durable before any hash row
    /// references it; a failure anywhere rolls the whole batch back.
    pub async fn insert_timestamp_and_link(
        &self,
        timestamp: &TimestampRecord,
        hash_ids: &[Uuid],
        updated_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO timestamps (id, merkle_root, root_hash, proof, proof_base64, calendar_url, date_created)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(timestamp.id.to_string())
        .bind(&timestamp.merkle_root)
        .bind(&timestamp.root_hash)
        .bind(&timestamp.proof)
        .bind(&timestamp.proof_base64)
        .bind(&timestamp.calendar_url)
        .bind(timestamp.date_created)
        .execute(&mut *tx)
        .await?;

        for hash_id in hash_ids {
            sqlx::query(
                r#"
                UPDATE ballot_hashes
                SET timestamp_id = ?1, date_updated = ?2
                WHERE id = ?3
                "#,
            )
            .bind(timestamp.id.to_string())
            .bind(updated_at)
            .bind(hash_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    pub async fn timestamp_by_id(&self, id: Uuid) -> Result<Option<TimestampRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, merkle_root, root_hash, proof, proof_base64, calendar_url, date_created
            FROM timestamps
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| timestamp_from_row(&row)).transpose()
    }

    pub async fn pipeline_counts(&self) -> Result<PipelineCounts, sqlx::Error> {
        let ballots: i64 = sqlx::query("SELECT COUNT(*) AS n FROM ballots")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        let hashed: i64 = sqlx::query("SELECT COUNT(*) AS n FROM ballot_hashes")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        let unanchored: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM ballot_hashes WHERE timestamp_id IS NULL")
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;
        let anchors: i64 = sqlx::query("SELECT COUNT(*) AS n FROM timestamps")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        Ok(PipelineCounts {
            ballots,
            hashed,
            unanchored,
            anchors,
        })
    }
}

/// Snapshot of pipeline progress for the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineCounts {
    pub ballots: i64,
    pub hashed: i64,
    pub unanchored: i64,
    pub anchors: i64,
}

fn ballot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Ballot, sqlx::Error> {
    let snapshot: String = row.try_get("snapshot")?;
    Ok(Ballot {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        election: serde_json::from_str(&snapshot).map_err(decode_err)?,
        cast_at: row.try_get("cast_at")?,
    })
}

fn ballot_hash_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BallotHash, sqlx::Error> {
    let timestamp_id: Option<String> = row.try_get("timestamp_id")?;
    Ok(BallotHash {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        ballot_id: parse_uuid(&row.try_get::<String, _>("ballot_id")?)?,
        hash: row.try_get("hash")?,
        hash_hex: row.try_get("hash_hex")?,
        date_created: row.try_get("date_created")?,
        date_updated: row.try_get("date_updated")?,
        timestamp_id: timestamp_id.as_deref().map(parse_uuid).transpose()?,
    })
}

fn timestamp_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TimestampRecord, sqlx::Error> {
    Ok(TimestampRecord {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        merkle_root: row.try_get("merkle_root")?,
        root_hash: row.try_get("root_hash")?,
        proof: row.try_get("proof")?,
        proof_base64: row.try_get("proof_base64")?,
        calendar_url: row.try_get("calendar_url")?,
        date_created: row.try_get("date_created")?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(s).map_err(decode_err)
}

fn decode_err<E: std::error::Error + Send + Sync + 'static>(err: E) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn election() -> Election {
        Election {
            id: Uuid::new_v4(),
            name: "Water District".to_string(),
            start: Utc.with_ymd_and_hms(2026, 1, 20, 7, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 1, 20, 19, 0, 0).unwrap(),
            races: Vec::new(),
        }
    }

    fn hash_row(ballot_id: Uuid, created: chrono::DateTime<Utc>) -> BallotHash {
        let hash = vec![0xab; 32];
        BallotHash {
            id: Uuid::new_v4(),
            ballot_id,
            hash_hex: hex::encode(&hash),
            hash,
            date_created: created,
            date_updated: created,
            timestamp_id: None,
        }
    }

    async fn database() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn election_round_trips_through_its_definition() {
        let db = database().await;
        let stored = election();
        db.insert_election(&stored).await.unwrap();

        let loaded = db.election_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, stored.id);
        assert_eq!(loaded.name, stored.name);
        assert_eq!(loaded.start, stored.start);
    }

    #[tokio::test]
    async fn ballot_snapshot_round_trips() {
        let db = database().await;
        let stored = election();
        db.insert_election(&stored).await.unwrap();

        let ballot = Ballot {
            id: Uuid::new_v4(),
            election: stored.clone(),
            cast_at: stored.start + chrono::Duration::hours(3),
        };
        db.insert_ballot(&ballot).await.unwrap();

        let loaded = db.ballot_by_id(ballot.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, ballot.id);
        assert_eq!(loaded.election.id, stored.id);
    }

    #[tokio::test]
    async fn second_hash_for_a_ballot_violates_the_unique_constraint() {
        let db = database().await;
        let stored = election();
        db.insert_election(&stored).await.unwrap();

        let ballot = Ballot {
            id: Uuid::new_v4(),
            election: stored.clone(),
            cast_at: stored.start,
        };
        db.insert_ballot(&ballot).await.unwrap();

        db.insert_ballot_hash(&hash_row(ballot.id, stored.start))
            .await
            .unwrap();
        let err = db
            .insert_ballot_hash(&hash_row(ballot.id, stored.start))
            .await
            .unwrap_err();

        // The constraint, not the pre-check, is the at-most-one guarantee.
        assert!(err
            .as_database_error()
            .map(|db_err| db_err.is_unique_violation())
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn unanchored_rows_come_back_newest_first() {
        let db = database().await;
        let stored = election();
        db.insert_election(&stored).await.unwrap();

        let mut ids = Vec::new();
        for hour in 0..3 {
            let ballot = Ballot {
                id: Uuid::new_v4(),
                election: stored.clone(),
                cast_at: stored.start,
            };
            db.insert_ballot(&ballot).await.unwrap();
            let row = hash_row(ballot.id, stored.start + chrono::Duration::hours(hour));
            db.insert_ballot_hash(&row).await.unwrap();
            ids.push(row.id);
        }

        let pending = db.unanchored_ballot_hashes().await.unwrap();
        let order: Vec<Uuid> = pending.iter().map(|row| row.id).collect();
        assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
    }

    #[tokio::test]
    async fn linking_sets_timestamp_id_in_one_transaction() {
        let db = database().await;
        let stored = election();
        db.insert_election(&stored).await.unwrap();

        let ballot = Ballot {
            id: Uuid::new_v4(),
            election: stored.clone(),
            cast_at: stored.start,
        };
        db.insert_ballot(&ballot).await.unwrap();
        let row = hash_row(ballot.id, stored.start);
        db.insert_ballot_hash(&row).await.unwrap();

        let updated_at = stored.start + chrono::Duration::hours(5);
        let timestamp = TimestampRecord {
            id: Uuid::new_v4(),
            merkle_root: vec![0x01; 32],
            root_hash: vec![0x02; 32],
            proof: b"proof".to_vec(),
            proof_base64: "cHJvb2Y=".to_string(),
            calendar_url: None,
            date_created: updated_at,
        };
        db.insert_timestamp_and_link(&timestamp, &[row.id], updated_at)
            .await
            .unwrap();

        let linked = db.ballot_hash_for_ballot(ballot.id).await.unwrap().unwrap();
        assert_eq!(linked.timestamp_id, Some(timestamp.id));
        assert_eq!(linked.date_updated, updated_at);

        let loaded = db.timestamp_by_id(timestamp.id).await.unwrap().unwrap();
        assert_eq!(loaded.merkle_root, timestamp.merkle_root);
        assert!(db.unanchored_ballot_hashes().await.unwrap().is_empty());
    }
}
