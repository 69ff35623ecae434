//! Ekklesia cache layer.
//!
//! Caching, session storage, and rate limiting for the Ekklesia
//! congregation platform, backed by a remote key-value store reached over
//! HTTPS. Two components:
//!
//! - [`CacheService`]: typed get/set/delete, pattern-based bulk deletion,
//!   fetch-through reads with stale-while-revalidate and best-effort fetch
//!   de-duplication, a fixed-window rate limiter, session CRUD with
//!   per-member session indexing, and set operations.
//! - [`Invalidator`]: maps domain write events (a post edited, an RSVP
//!   changed) to the exact keys that must be dropped, plus namespace-wide
//!   purges and a [`CacheWarmer`] for post-deploy repopulation.
//!
//! The backend is optional by design: when credentials are absent or the
//! store is unreachable, every operation returns its documented safe
//! default and callers proceed as if caching were disabled. The layer
//! trades freshness and rate-limit protection for availability; it can
//! never turn a cache problem into a request failure.
//!
//! ## Configuration
//!
//! Credentials come from the environment:
//!
//! ```text
//! EKKLESIA_KV_REST_URL=https://kv.example.com
//! EKKLESIA_KV_REST_TOKEN=<bearer token>
//! EKKLESIA_CACHE_OFFLINE=1   # optional: force the degraded mode
//! ```
//!
//! Everything else (TTLs for sessions, scan sizes, pagination bounds) lives
//! in `ekklesia.toml`; see [`config::Settings`].

pub mod backend;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod keys;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod ttl;
pub mod warmup;

pub use config::{CacheSettings, Settings};
pub use error::CacheError;
pub use invalidation::{
    AdminScope, BlogScope, DoctrineScope, EventScope, Invalidator, PageScope, UserConcerns,
};
pub use keys::{CacheKey, KeyPattern};
pub use rate_limit::RateLimitVerdict;
pub use service::{CacheInfo, CacheService};
pub use session::SessionRecord;
pub use ttl::{FetchOptions, Ttl};
pub use warmup::{CacheWarmer, WarmupReport, WarmupSource};
