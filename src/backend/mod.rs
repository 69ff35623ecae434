//! Key-value backend abstraction.
//!
//! [`KvBackend`] is the narrow seam between the cache service and the
//! remote store: single-key and small-batch atomic operations only. The
//! production implementation is [`RestBackend`]; [`MemoryBackend`] backs
//! tests and credential-less development.

mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use async_trait::async_trait;

use crate::error::CacheError;

/// One page of a cursor-based keyspace scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next iteration; `"0"` means the scan is complete.
    pub cursor: String,
    /// Keys matching the pattern within this iteration.
    pub keys: Vec<String>,
}

/// Minimal command surface the cache layer needs from a key-value store.
///
/// All coordination (counter windows, fetch locks) relies on the store's
/// own single-key atomicity; implementations must not add locking of
/// their own.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`, with an absolute expiry derived from `ttl_secs` when
    /// given.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), CacheError>;

    /// Store `value` only if `key` is absent. Returns whether the write won.
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, CacheError>;

    /// Delete keys in one batch; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// One iteration of a cursor-based scan for keys matching a glob.
    async fn scan(&self, cursor: &str, pattern: &str, count: u64) -> Result<ScanPage, CacheError>;

    /// Atomically add `by` and return the new value.
    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CacheError>;

    /// Set a key's expiry; returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError>;

    /// Remaining TTL in seconds; `-1` without expiry, `-2` when absent.
    async fn ttl(&self, key: &str) -> Result<i64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Add a member to a set; returns how many members were newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<u64, CacheError>;

    /// Remove a member from a set; returns how many members were removed.
    async fn srem(&self, key: &str, member: &str) -> Result<u64, CacheError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
