//! Fixed-window rate limiting on top of the cache backend.
//!
//! The counter relies on the store's atomic increment; the window expiry
//! is set only when the count transitions to 1, so the window is fixed
//! from first use rather than rolling.

use serde::Serialize;
use tracing::{debug, warn};

use crate::keys::CacheKey;
use crate::service::CacheService;
use crate::ttl::Ttl;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitVerdict {
    /// Whether this request fits inside the window.
    pub allowed: bool,
    /// Requests left in the window after this one.
    pub remaining: i64,
    /// Seconds until the window resets.
    pub reset_in: i64,
    /// The configured maximum, echoed for response headers.
    pub limit: i64,
}

impl RateLimitVerdict {
    pub fn is_limited(&self) -> bool {
        !self.allowed
    }

    /// The verdict handed out when the backend cannot arbitrate: fully
    /// permissive, availability over protection.
    fn open(limit: i64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_in: 0,
            limit,
        }
    }
}

impl CacheService {
    /// Count one request against `(resource, identifier)` and judge it.
    ///
    /// The first increment of a fresh window pins the window's expiry to
    /// `window_secs`; later increments never touch it. When the backend is
    /// unavailable or the increment fails the request is allowed: rate
    /// limiting degrades open, never closed.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        resource: &str,
        max: i64,
        window_secs: u64,
    ) -> RateLimitVerdict {
        if !self.is_available() {
            return RateLimitVerdict::open(max);
        }

        let key = CacheKey::RateLimit {
            resource: resource.to_string(),
            identifier: identifier.to_string(),
        };

        let count = self.increment(&key, 1).await;
        if count == 0 {
            // 0 is increment()'s degraded value; the failure is already logged.
            return RateLimitVerdict::open(max);
        }

        if count == 1 && !self.expire(&key, Ttl::Seconds(window_secs)).await {
            warn!(key = %key, "could not pin rate-limit window expiry");
        }

        let ttl = self.ttl(&key).await;
        let reset_in = if ttl > 0 { ttl } else { window_secs as i64 };

        let verdict = RateLimitVerdict {
            allowed: count <= max,
            remaining: (max - count).max(0),
            reset_in,
            limit: max,
        };
        debug!(
            key = %key,
            count,
            allowed = verdict.allowed,
            remaining = verdict.remaining,
            "rate limit check"
        );
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_verdict_is_fully_permissive() {
        let verdict = RateLimitVerdict::open(10);
        assert!(verdict.allowed);
        assert!(!verdict.is_limited());
        assert_eq!(verdict.remaining, 10);
        assert_eq!(verdict.limit, 10);
    }

    #[tokio::test]
    async fn degraded_service_always_allows() {
        let cache = CacheService::disabled();
        for _ in 0..100 {
            let verdict = cache.check_rate_limit("10.0.0.1", "login", 3, 60).await;
            assert!(verdict.allowed);
            assert_eq!(verdict.remaining, 3);
        }
    }
}
