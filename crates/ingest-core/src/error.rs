use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Unknown source site: {0}")]
    InvalidSource(String),
    #[error("Invalid batch size {0}: must be between 1 and {max}", max = crate::import::MAX_BATCH_SIZE)]
    InvalidBatchSize(u32),
}

pub type Result<T> = std::result::Result<T, IngestError>;
