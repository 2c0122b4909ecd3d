//! Store trait definitions

use async_trait::async_trait;

use crate::StoreResult;

/// Asynchronous key/value store.
///
/// Both persistence tiers implement this; values are opaque strings (the
/// persistence layer stores JSON).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// Delete a value; deleting an absent key is not an error
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
