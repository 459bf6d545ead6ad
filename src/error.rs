use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("ballot {ballot_id} is already hashed as {existing_hash_id}")]
    HashConflict {
        ballot_id: Uuid,
        existing_hash_id: Uuid,
    },

    #[error("timestamp authority error: {0}")]
    ExternalService(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("notification error: {0}")]
    Notification(String),
}

pub type Result<T> = std::result::Result<T, IntegrityError>;
