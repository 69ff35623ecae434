//! Failure-tolerant cache service.
//!
//! Wraps an optional [`KvBackend`]: when credentials are absent or the
//! backend misbehaves, every operation returns its documented safe default
//! (miss, no-op, pass-through) instead of erroring. Cache loss costs
//! latency, never correctness.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{KvBackend, RestBackend};
use crate::config::CacheSettings;
use crate::error::CacheError;
use crate::keys::{CacheKey, KeyPattern};
use crate::ttl::{FetchOptions, Ttl};

pub(crate) const METRIC_HIT: &str = "ekklesia_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "ekklesia_cache_miss_total";
pub(crate) const METRIC_ERROR: &str = "ekklesia_cache_error_total";
pub(crate) const METRIC_INVALIDATED: &str = "ekklesia_cache_invalidated_total";
pub(crate) const METRIC_OP_MS: &str = "ekklesia_cache_op_ms";

/// Upper bound on SCAN iterations during a pattern delete, so a confused
/// cursor can never loop forever.
const MAX_SCAN_ITERATIONS: u32 = 1_000;

/// Connectivity report for operational dashboards.
#[derive(Debug, Clone)]
pub struct CacheInfo {
    pub connected: bool,
    pub latency: Option<Duration>,
    pub endpoint: Option<String>,
}

/// Facade over the remote key-value store.
///
/// Cheap to clone; clones share the backend handle.
#[derive(Clone)]
pub struct CacheService {
    backend: Option<Arc<dyn KvBackend>>,
    settings: CacheSettings,
    endpoint: Option<String>,
}

impl CacheService {
    pub fn new(backend: Option<Arc<dyn KvBackend>>, settings: CacheSettings) -> Self {
        Self {
            backend,
            settings,
            endpoint: None,
        }
    }

    /// Build the production service: a REST backend when credentials are
    /// configured, the degraded pass-through otherwise.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        match RestBackend::from_settings(settings) {
            Some(backend) => {
                let endpoint = backend.endpoint_host();
                Self {
                    backend: Some(Arc::new(backend)),
                    settings: settings.clone(),
                    endpoint,
                }
            }
            None => Self::new(None, settings.clone()),
        }
    }

    /// A service with no backend: every operation takes its degraded path.
    pub fn disabled() -> Self {
        Self::new(None, CacheSettings::default())
    }

    /// Whether a backend handle exists. Says nothing about reachability;
    /// use [`ping`](Self::ping) for that.
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub(crate) fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub(crate) fn backend(&self) -> Option<&Arc<dyn KvBackend>> {
        self.backend.as_ref()
    }

    // ========================================================================
    // Core primitives
    // ========================================================================

    /// Read and deserialize a cached value. Miss, backend failure, and an
    /// unparseable payload all read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match decode(&raw) {
            Some(value) => Some(value),
            None => {
                debug!(key = %key, "cached payload did not match the requested type");
                None
            }
        }
    }

    /// Read a cached value without a target type. A payload that fails to
    /// parse as JSON is recovered as the raw stored string.
    pub async fn get_value(&self, key: &CacheKey) -> Option<Value> {
        let raw = self.get_raw(key).await?;
        Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }

    async fn get_raw(&self, key: &CacheKey) -> Option<String> {
        let backend = self.backend()?;
        match backend.get(&key.wire()).await {
            Ok(Some(raw)) => {
                counter!(METRIC_HIT).increment(1);
                Some(raw)
            }
            Ok(None) => {
                counter!(METRIC_MISS).increment(1);
                None
            }
            Err(err) => {
                self.note_failure("get", key, &err);
                None
            }
        }
    }

    /// Serialize and store a value. Returns whether the write happened.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Ttl) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        let encoded = match encode(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.note_failure("set", key, &err);
                return false;
            }
        };
        match backend
            .set(&key.wire(), &encoded, Some(ttl.as_secs()))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                self.note_failure("set", key, &err);
                false
            }
        }
    }

    /// Delete one key. Deleting an absent key is still a success.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.delete_many(std::slice::from_ref(key)).await
    }

    /// Delete several keys in one backend call. An empty list is a no-op
    /// success.
    pub async fn delete_many(&self, keys: &[CacheKey]) -> bool {
        if keys.is_empty() {
            return true;
        }
        let Some(backend) = self.backend() else {
            return false;
        };
        let wires: Vec<String> = keys.iter().map(CacheKey::wire).collect();
        match backend.del(&wires).await {
            Ok(deleted) => {
                counter!(METRIC_INVALIDATED).increment(deleted);
                true
            }
            Err(err) => {
                self.note_failure("delete", &keys[0], &err);
                false
            }
        }
    }

    /// Delete every key matching a namespace pattern, enumerating with a
    /// bounded cursor scan. Returns how many keys were removed.
    ///
    /// Expensive: walks the keyspace. Meant for coarse invalidation and
    /// operational tooling, never per-request paths.
    pub async fn delete_pattern(&self, pattern: &KeyPattern) -> u64 {
        let Some(backend) = self.backend() else {
            return 0;
        };
        let glob = pattern.to_string();
        let mut cursor = "0".to_string();
        let mut matched: Vec<String> = Vec::new();

        for _ in 0..MAX_SCAN_ITERATIONS {
            let page = match backend.scan(&cursor, &glob, self.settings.scan_count).await {
                Ok(page) => page,
                Err(err) => {
                    counter!(METRIC_ERROR).increment(1);
                    warn!(pattern = %glob, error = %err, "pattern scan failed");
                    return 0;
                }
            };
            matched.extend(page.keys);
            if page.cursor == "0" {
                break;
            }
            cursor = page.cursor;
        }

        if matched.is_empty() {
            return 0;
        }
        match backend.del(&matched).await {
            Ok(deleted) => {
                counter!(METRIC_INVALIDATED).increment(deleted);
                debug!(pattern = %glob, deleted, "pattern delete completed");
                deleted
            }
            Err(err) => {
                counter!(METRIC_ERROR).increment(1);
                warn!(pattern = %glob, error = %err, "pattern delete failed");
                0
            }
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.exists(&key.wire()).await {
            Ok(present) => present,
            Err(err) => {
                self.note_failure("exists", key, &err);
                false
            }
        }
    }

    /// Remaining TTL in seconds, `-1` when unknown or absent.
    pub async fn ttl(&self, key: &CacheKey) -> i64 {
        let Some(backend) = self.backend() else {
            return -1;
        };
        match backend.ttl(&key.wire()).await {
            Ok(ttl) => ttl,
            Err(err) => {
                self.note_failure("ttl", key, &err);
                -1
            }
        }
    }

    pub async fn expire(&self, key: &CacheKey, ttl: Ttl) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.expire(&key.wire(), ttl.as_secs()).await {
            Ok(applied) => applied,
            Err(err) => {
                self.note_failure("expire", key, &err);
                false
            }
        }
    }

    /// Batch read. Degrades to a vector of `None`s of matching length.
    pub async fn mget(&self, keys: &[CacheKey]) -> Vec<Option<Value>> {
        let Some(backend) = self.backend() else {
            return vec![None; keys.len()];
        };
        if keys.is_empty() {
            return Vec::new();
        }
        let wires: Vec<String> = keys.iter().map(CacheKey::wire).collect();
        match backend.mget(&wires).await {
            Ok(values) => values
                .into_iter()
                .map(|raw| {
                    raw.map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
                })
                .collect(),
            Err(err) => {
                self.note_failure("mget", &keys[0], &err);
                vec![None; keys.len()]
            }
        }
    }

    /// Atomically add `by` and return the new counter value (0 when the
    /// backend is unavailable).
    pub async fn increment(&self, key: &CacheKey, by: i64) -> i64 {
        let Some(backend) = self.backend() else {
            return 0;
        };
        match backend.incr_by(&key.wire(), by).await {
            Ok(value) => value,
            Err(err) => {
                self.note_failure("increment", key, &err);
                0
            }
        }
    }

    // ========================================================================
    // Set operations
    // ========================================================================

    /// Add a member to a set, optionally refreshing the set's TTL.
    pub async fn sadd(&self, key: &CacheKey, member: &str, ttl: Option<Ttl>) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        if let Err(err) = backend.sadd(&key.wire(), member).await {
            self.note_failure("sadd", key, &err);
            return false;
        }
        if let Some(ttl) = ttl
            && let Err(err) = backend.expire(&key.wire(), ttl.as_secs()).await
        {
            self.note_failure("sadd", key, &err);
        }
        true
    }

    pub async fn smembers(&self, key: &CacheKey) -> Vec<String> {
        let Some(backend) = self.backend() else {
            return Vec::new();
        };
        match backend.smembers(&key.wire()).await {
            Ok(members) => members,
            Err(err) => {
                self.note_failure("smembers", key, &err);
                Vec::new()
            }
        }
    }

    pub async fn sismember(&self, key: &CacheKey, member: &str) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.sismember(&key.wire(), member).await {
            Ok(present) => present,
            Err(err) => {
                self.note_failure("sismember", key, &err);
                false
            }
        }
    }

    // ========================================================================
    // Fetch-through
    // ========================================================================

    /// Fetch-through read: return the cached value, or compute it with
    /// `fetcher` and store it under `ttl`.
    ///
    /// With [`FetchOptions::stale_ttl`], a cache hit additionally triggers at
    /// most one background refresh per stale window; the caller always gets
    /// the currently cached value. With [`FetchOptions::lock_timeout`], a
    /// miss first races for a set-if-absent lock; losers wait briefly and
    /// re-check the cache once before fetching anyway. That de-duplication
    /// is probabilistic: under contention two callers may both fetch.
    ///
    /// Any cache failure falls back to calling `fetcher` and returning its
    /// result unstored. Only `fetcher`'s own error reaches the caller.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        options: FetchOptions,
        fetcher: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let Some(backend) = self.backend() else {
            return fetcher().await;
        };

        match backend.get(&key.wire()).await {
            Ok(Some(raw)) => {
                if let Some(cached) = decode::<T>(&raw) {
                    counter!(METRIC_HIT).increment(1);
                    if let Some(stale_ttl) = options.stale_ttl {
                        self.spawn_revalidation(key, ttl, stale_ttl, fetcher).await;
                    }
                    return Ok(cached);
                }
                debug!(key = %key, "cached payload unusable, refetching");
            }
            Ok(None) => {
                counter!(METRIC_MISS).increment(1);
            }
            Err(err) => {
                self.note_failure("get_or_set", key, &err);
                // Correctness over caching: skip the lock dance and the
                // write-back, just produce the value.
                return fetcher().await;
            }
        }

        if let Some(lock_timeout) = options.lock_timeout
            && !self.acquire_fetch_lock(key, lock_timeout).await
        {
            tokio::time::sleep(Duration::from_millis(self.settings.lock_retry_delay_ms)).await;
            if let Some(raw) = backend.get(&key.wire()).await.ok().flatten()
                && let Some(cached) = decode::<T>(&raw)
            {
                counter!(METRIC_HIT).increment(1);
                return Ok(cached);
            }
            // The winner has not published yet; fetch anyway.
        }

        let value = fetcher().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Start a background refresh unless one is already in flight.
    ///
    /// The stale marker is claimed with a set-if-absent write, so across
    /// processes at most one refresh runs per stale window. The refresh
    /// future is detached; its failure is logged and never reaches the
    /// caller that triggered it.
    async fn spawn_revalidation<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        stale_ttl: u64,
        fetcher: F,
    ) where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let Some(backend) = self.backend() else {
            return;
        };
        match backend.set_nx(&key.stale_marker(), "1", stale_ttl).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                self.note_failure("revalidate", key, &err);
                return;
            }
        }

        let service = self.clone();
        let key = key.clone();
        let refresh = fetcher();
        tokio::spawn(async move {
            match refresh.await {
                Ok(value) => {
                    if !service.set(&key, &value, ttl).await {
                        warn!(key = %key, "background revalidation could not store result");
                    } else {
                        debug!(key = %key, "background revalidation refreshed entry");
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "background revalidation fetch failed");
                }
            }
        });
    }

    async fn acquire_fetch_lock(&self, key: &CacheKey, lock_timeout: u64) -> bool {
        let Some(backend) = self.backend() else {
            return true;
        };
        match backend.set_nx(&key.lock(), "1", lock_timeout).await {
            Ok(won) => won,
            Err(err) => {
                self.note_failure("lock", key, &err);
                // Treat a broken lock path as won: fetching twice is
                // cheaper than not fetching at all.
                true
            }
        }
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// True when the backend answers a PING.
    pub async fn ping(&self) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.ping().await {
            Ok(()) => true,
            Err(err) => {
                counter!(METRIC_ERROR).increment(1);
                warn!(error = %err, "cache ping failed");
                false
            }
        }
    }

    /// Connectivity plus round-trip latency.
    pub async fn info(&self) -> CacheInfo {
        if self.backend.is_none() {
            return CacheInfo {
                connected: false,
                latency: None,
                endpoint: None,
            };
        }
        let started_at = Instant::now();
        let connected = self.ping().await;
        let latency = connected.then(|| started_at.elapsed());
        if let Some(latency) = latency {
            metrics::histogram!(METRIC_OP_MS).record(latency.as_secs_f64() * 1000.0);
        }
        CacheInfo {
            connected,
            latency,
            endpoint: self.endpoint.clone(),
        }
    }

    fn note_failure(&self, op: &'static str, key: &CacheKey, err: &CacheError) {
        counter!(METRIC_ERROR).increment(1);
        warn!(op, key = %key, error = %err, "cache operation degraded");
    }
}

/// Serialize a value for storage. Strings are stored raw, everything else
/// as its JSON rendering.
fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    match serde_json::to_value(value)? {
        Value::String(raw) => Ok(raw),
        other => Ok(other.to_string()),
    }
}

/// Parse a stored payload. Raw strings (stored unquoted) are recovered by
/// re-wrapping them as a JSON string.
fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| serde_json::from_value(Value::String(raw.to_string())).ok())
}
