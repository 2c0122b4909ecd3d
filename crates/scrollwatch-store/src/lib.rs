//! Persistence layer for scrollwatch
//!
//! Provides:
//! - `KvStore`, the asynchronous key/value primitive both tiers implement
//! - `MemoryStore`, a process-local fast tier
//! - `SqliteStore`, a durable tier backed by a single key/value table
//! - `BatchStore`, which mirrors every write into the fast tier and batches
//!   durable-tier writes on a timer

mod batch;
mod memory;
mod sqlite;
mod traits;

pub use batch::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Key under which the whole `StorageData` aggregate is stored in both tiers
pub const STORAGE_KEY: &str = "scrollwatch";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for scrollwatch_util::WatchError {
    fn from(e: StoreError) -> Self {
        scrollwatch_util::WatchError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
