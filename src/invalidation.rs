//! Cache invalidation orchestration.
//!
//! One place maps "this domain entity changed" to "these keys are now
//! wrong", consuming the same key enums the read side caches under. Every
//! entry point is fire-and-forget from the caller's perspective: the write
//! to the source of truth has already succeeded, so a failed invalidation
//! only means temporarily stale reads, never a rejected write.

use tracing::{debug, info};

use crate::keys::{CacheKey, KeyPattern};
use crate::service::CacheService;

/// What changed in the blog domain.
#[derive(Debug, Clone, Default)]
pub struct BlogScope {
    pub post_id: Option<i64>,
    pub slug: Option<String>,
    pub category_id: Option<i64>,
    /// Drop the whole `blog:*` namespace instead. Expensive; last resort.
    pub all: bool,
}

/// What changed in the events domain.
#[derive(Debug, Clone, Default)]
pub struct EventScope {
    pub event_id: Option<i64>,
    pub all: bool,
}

/// What changed in the doctrines domain.
#[derive(Debug, Clone, Default)]
pub struct DoctrineScope {
    pub slug: Option<String>,
    pub all: bool,
}

/// What changed for the site's content pages.
#[derive(Debug, Clone, Default)]
pub struct PageScope {
    pub slug: Option<String>,
    pub all: bool,
}

/// Which member-related caches to drop.
///
/// Concerns are separate so a profile edit does not tear down the member's
/// active sessions; `auth` is for security events (password reset, role
/// change) and implies full session revocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserConcerns {
    pub profile: bool,
    pub sessions: bool,
    pub auth: bool,
}

/// What changed in the admin domain.
#[derive(Debug, Clone, Default)]
pub struct AdminScope {
    /// A named statistic (e.g. `pending-comments`); the dashboard
    /// aggregate is dropped regardless.
    pub stat: Option<String>,
    pub all: bool,
}

/// Maps domain mutations to cache deletions.
///
/// Returned counts are informational: namespace purges report keys actually
/// removed, targeted drops report keys addressed (deleting an already-absent
/// key is indistinguishable from deleting a live one, and does not matter).
#[derive(Clone)]
pub struct Invalidator {
    cache: CacheService,
}

impl Invalidator {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    fn page_bound(&self) -> u32 {
        self.cache.settings().list_page_bound
    }

    /// Invalidate after a blog mutation (post created/edited/deleted,
    /// comment moderated, category renamed).
    ///
    /// List and aggregate keys are always dropped; whether a given post
    /// still belongs in "featured" or "trending" is not recomputed here.
    /// Entity keys are dropped when identifiers are supplied. Paginated
    /// lists are invalidated up to the configured page bound; deeper pages
    /// expire via their own TTL.
    pub async fn blog(&self, scope: BlogScope) -> u64 {
        if scope.all {
            return self.purge_namespace(KeyPattern::Blog).await;
        }

        let mut keys = vec![
            CacheKey::FeaturedPosts,
            CacheKey::TrendingPosts,
            CacheKey::Categories,
        ];
        for page in 1..=self.page_bound() {
            keys.push(CacheKey::PostList {
                page,
                category_id: None,
            });
        }
        if let Some(category_id) = scope.category_id {
            for page in 1..=self.page_bound() {
                keys.push(CacheKey::PostList {
                    page,
                    category_id: Some(category_id),
                });
            }
        }
        if let Some(post_id) = scope.post_id {
            keys.push(CacheKey::PostById(post_id));
            keys.push(CacheKey::PostStats(post_id));
            keys.push(CacheKey::RelatedPosts(post_id));
        }
        if let Some(slug) = scope.slug {
            keys.push(CacheKey::PostBySlug(slug));
        }

        self.drop_keys("blog", keys).await
    }

    /// Invalidate after an event mutation (event edited, RSVP changed).
    ///
    /// An RSVP change touches per-member check keys, which are addressed
    /// by a pattern scoped to the event id.
    pub async fn events(&self, scope: EventScope) -> u64 {
        if scope.all {
            return self.purge_namespace(KeyPattern::Events).await;
        }

        let mut keys = vec![CacheKey::UpcomingEvents];
        for page in 1..=self.page_bound() {
            keys.push(CacheKey::EventList { page });
        }
        let mut dropped = 0;
        if let Some(event_id) = scope.event_id {
            keys.push(CacheKey::Event(event_id));
            keys.push(CacheKey::EventRsvps(event_id));
            keys.push(CacheKey::EventStats(event_id));
            dropped += self
                .cache
                .delete_pattern(&KeyPattern::EventRsvpChecks(event_id))
                .await;
        }

        dropped + self.drop_keys("events", keys).await
    }

    /// Invalidate after a doctrine edit.
    pub async fn doctrines(&self, scope: DoctrineScope) -> u64 {
        if scope.all {
            return self.purge_namespace(KeyPattern::Doctrines).await;
        }

        let mut keys = vec![CacheKey::DoctrineList];
        if let Some(slug) = scope.slug {
            keys.push(CacheKey::DoctrineBySlug(slug));
        }
        self.drop_keys("doctrines", keys).await
    }

    /// Invalidate after a content-page edit.
    pub async fn pages(&self, scope: PageScope) -> u64 {
        if scope.all {
            return self.purge_namespace(KeyPattern::Pages).await;
        }

        let mut keys = Vec::new();
        if let Some(slug) = scope.slug {
            keys.push(CacheKey::PageBySlug(slug));
        }
        self.drop_keys("pages", keys).await
    }

    /// Invalidate member caches by concern.
    pub async fn users(&self, user_id: &str, concerns: UserConcerns) -> u64 {
        let mut dropped = 0;

        if concerns.profile || concerns.auth {
            dropped += self
                .drop_keys("users", vec![CacheKey::UserProfile(user_id.to_string())])
                .await;
        }
        if concerns.sessions || concerns.auth {
            dropped += self.cache.delete_all_user_sessions(user_id).await;
        }

        debug!(user_id, ?concerns, dropped, "user caches invalidated");
        dropped
    }

    /// Invalidate admin aggregates.
    pub async fn admin(&self, scope: AdminScope) -> u64 {
        if scope.all {
            return self.purge_namespace(KeyPattern::Admin).await;
        }

        let mut keys = vec![CacheKey::AdminDashboard];
        if let Some(stat) = scope.stat {
            keys.push(CacheKey::AdminStat(stat));
        }
        self.drop_keys("admin", keys).await
    }

    /// Drop all cached search results. Individual result pages cannot be
    /// targeted (any content change may affect any query), so this is
    /// always a namespace purge.
    pub async fn search(&self) -> u64 {
        self.purge_namespace(KeyPattern::Search).await
    }

    /// Drop every clearable namespace.
    ///
    /// Operational use only (deploys, data migrations): walks large parts
    /// of the keyspace and empties every hot path at once. Sessions and
    /// rate-limit counters are left alone.
    pub async fn clear_all(&self) -> u64 {
        let mut dropped = 0;
        for pattern in KeyPattern::clearable() {
            dropped += self.purge_namespace(pattern.clone()).await;
        }
        info!(dropped, "all content caches cleared");
        dropped
    }

    async fn purge_namespace(&self, pattern: KeyPattern) -> u64 {
        let dropped = self.cache.delete_pattern(&pattern).await;
        info!(pattern = %pattern, dropped, "namespace purged");
        dropped
    }

    async fn drop_keys(&self, domain: &'static str, keys: Vec<CacheKey>) -> u64 {
        let count = keys.len() as u64;
        if !self.cache.delete_many(&keys).await {
            // The source of truth already changed; stale reads until TTL
            // expiry are the accepted cost.
            debug!(domain, "invalidation skipped: backend unavailable");
            return 0;
        }
        debug!(domain, keys = count, "keys invalidated");
        count
    }
}
