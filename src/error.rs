//! Error types for roster-sync

use thiserror::Error;

use crate::identity::AccountKey;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Resource creation failed: {0}")]
    Creation(String),

    #[error("Owning account not indexed: {0}")]
    AccountNotIndexed(AccountKey),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}
