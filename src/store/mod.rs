//! Key-value store consumed by the identity layer.
//!
//! The interface mirrors a small Redis subset: scalars with atomic increment, hashes
//! with set-if-absent, and sets. Two backends exist: [`MemoryStore`] for single-process
//! runs and tests, [`SledStore`] for a durable store shared by separate stage processes.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(#[from] sled::Error),
    #[error("corrupt value {value:?} at {key}")]
    Corrupt { key: String, value: String },
    #[error("entry {key}/{field} vanished after a lost set-if-absent")]
    Vanished { key: String, field: String },
    #[error("counter {counter} exceeded the 32-bit id space")]
    IdOverflow { counter: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Every mutation is individually atomic; nothing spans more than one key.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Increments the integer at `key` (missing counts as 0) and returns the new value.
    fn incr(&self, key: &str) -> StoreResult<u64>;

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Writes only if `field` is absent; returns whether this call wrote.
    fn hsetnx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool>;

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    /// Hash keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Drops scalars, hashes and sets whose key starts with `prefix`.
    fn delete_prefix(&self, prefix: &str) -> StoreResult<()>;

    fn flush(&self) -> StoreResult<()>;
}

pub(crate) fn parse_counter(key: &str, raw: &str) -> StoreResult<u64> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
