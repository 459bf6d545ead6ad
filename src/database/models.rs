use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical election definition as published by the election authority.
/// A ballot embeds a snapshot of this structure; any divergence outside the
/// per-candidate `selected` flags is tampering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    pub id: Uuid,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub races: Vec<Race>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: Uuid,
    pub name: String,
    /// Upper bound on selected candidates for this race.
    pub max_selections: u32,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    pub party: Option<String>,
    /// The voter's mark. The only field a submitted snapshot may change.
    pub selected: bool,
}

/// A cast ballot: the submitted election snapshot, frozen at cast time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub id: Uuid,
    pub election: Election,
    pub cast_at: DateTime<Utc>,
}

/// Content hash of one ballot. 1:1 with `Ballot`, enforced by a UNIQUE
/// constraint on `ballot_id`. `timestamp_id` is set exactly once, when the
/// hash is anchored as part of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotHash {
    pub id: Uuid,
    pub ballot_id: Uuid,
    #[serde(with = "hash_bytes")]
    pub hash: Vec<u8>,
    pub hash_hex: String,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub timestamp_id: Option<Uuid>,
}

/// One anchored batch: the Merkle root over the batch's ballot hashes, the
/// digest of that root that was actually stamped, and the authority's proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampRecord {
    pub id: Uuid,
    #[serde(with = "hash_bytes")]
    pub merkle_root: Vec<u8>,
    #[serde(with = "hash_bytes")]
    pub root_hash: Vec<u8>,
    #[serde(with = "hash_bytes")]
    pub proof: Vec<u8>,
    pub proof_base64: String,
    pub calendar_url: Option<String>,
    pub date_created: DateTime<Utc>,
}

/// Serialize raw hash/proof bytes as hex so notification payloads stay
/// readable.
mod hash_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
