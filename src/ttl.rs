//! Expiry policy.
//!
//! Callers pick from an enumerated ladder instead of scattering ad hoc
//! second counts, so invalidation and warmup logic can reason about how
//! stale each read path is allowed to get.

/// Time-to-live ladder for cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// 60 seconds. Volatile aggregates (trending, admin dashboards).
    Short,
    /// 5 minutes. Paginated lists and search results.
    Medium,
    /// 30 minutes. Individual posts, events, doctrines.
    Long,
    /// 1 hour. Slow-moving collections (categories, featured).
    Hour,
    /// 24 hours. Sessions and profiles.
    Day,
    /// 7 days. Effectively static content.
    Week,
    /// Caller-supplied duration, for TTLs owned by another layer
    /// (e.g. the auth layer's session policy).
    Seconds(u64),
}

impl Ttl {
    pub fn as_secs(self) -> u64 {
        match self {
            Ttl::Short => 60,
            Ttl::Medium => 300,
            Ttl::Long => 1_800,
            Ttl::Hour => 3_600,
            Ttl::Day => 86_400,
            Ttl::Week => 604_800,
            Ttl::Seconds(secs) => secs,
        }
    }
}

/// Tuning knobs for [`CacheService::get_or_set`](crate::CacheService::get_or_set).
///
/// Both knobs default to off, which makes `get_or_set` a plain
/// read-through: return the cached value, or fetch and store on a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Serve the cached value immediately and refresh it in the background,
    /// at most once per this many seconds.
    pub stale_ttl: Option<u64>,
    /// On a miss, take a set-if-absent lock with this expiry so concurrent
    /// callers do not all recompute the same value. Best-effort: a losing
    /// caller waits briefly, re-checks once, then fetches anyway.
    pub lock_timeout: Option<u64>,
}

impl FetchOptions {
    /// Enable stale-while-revalidate with the given refresh window.
    pub fn stale(stale_ttl_secs: u64) -> Self {
        Self {
            stale_ttl: Some(stale_ttl_secs),
            ..Self::default()
        }
    }

    /// Enable fetch de-duplication with the given lock expiry.
    pub fn locked(lock_timeout_secs: u64) -> Self {
        Self {
            lock_timeout: Some(lock_timeout_secs),
            ..Self::default()
        }
    }

    pub fn with_lock(mut self, lock_timeout_secs: u64) -> Self {
        self.lock_timeout = Some(lock_timeout_secs);
        self
    }
}
