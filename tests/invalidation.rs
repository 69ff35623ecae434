//! Invalidation scoping and warmup tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use ekklesia_cache::backend::MemoryBackend;
use ekklesia_cache::warmup::WarmupError;
use ekklesia_cache::{
    AdminScope, BlogScope, CacheKey, CacheService, CacheSettings, CacheWarmer, DoctrineScope,
    EventScope, Invalidator, PageScope, Ttl, UserConcerns, WarmupSource,
};

fn harness() -> (CacheService, Invalidator) {
    let settings = CacheSettings {
        list_page_bound: 3,
        scan_count: 5,
        ..CacheSettings::default()
    };
    let cache = CacheService::new(Some(Arc::new(MemoryBackend::new())), settings);
    (cache.clone(), Invalidator::new(cache))
}

async fn seed(cache: &CacheService, key: CacheKey) {
    assert!(cache.set(&key, &json!({"seeded": true}), Ttl::Hour).await);
}

#[tokio::test]
async fn blog_slug_invalidation_clears_the_slug_and_the_coarse_lists() {
    let (cache, invalidator) = harness();

    let by_slug = CacheKey::PostBySlug("advent".to_string());
    let by_id = CacheKey::PostById(7);
    let list = CacheKey::PostList {
        page: 1,
        category_id: None,
    };
    let featured = CacheKey::FeaturedPosts;
    seed(&cache, by_slug.clone()).await;
    seed(&cache, by_id.clone()).await;
    seed(&cache, list.clone()).await;
    seed(&cache, featured.clone()).await;

    invalidator
        .blog(BlogScope {
            slug: Some("advent".to_string()),
            ..BlogScope::default()
        })
        .await;

    assert!(cache.get_value(&by_slug).await.is_none());
    // Coarse list/aggregate keys always fall, even without their ids.
    assert!(cache.get_value(&list).await.is_none());
    assert!(cache.get_value(&featured).await.is_none());
    // No id was supplied, so the id-keyed entry survives until its TTL.
    assert!(cache.get_value(&by_id).await.is_some());
}

#[tokio::test]
async fn blog_all_clears_every_blog_key_and_nothing_else() {
    let (cache, invalidator) = harness();

    seed(&cache, CacheKey::PostBySlug("advent".to_string())).await;
    seed(&cache, CacheKey::PostById(7)).await;
    seed(&cache, CacheKey::PostStats(7)).await;
    seed(&cache, CacheKey::RelatedPosts(7)).await;
    seed(&cache, CacheKey::Categories).await;
    seed(&cache, CacheKey::UpcomingEvents).await;

    let dropped = invalidator
        .blog(BlogScope {
            all: true,
            ..BlogScope::default()
        })
        .await;
    assert_eq!(dropped, 5);

    assert!(cache.get_value(&CacheKey::PostById(7)).await.is_none());
    assert!(cache.get_value(&CacheKey::PostStats(7)).await.is_none());
    assert!(cache.get_value(&CacheKey::UpcomingEvents).await.is_some());
}

#[tokio::test]
async fn category_invalidation_is_bounded_by_the_page_limit() {
    let (cache, invalidator) = harness();

    // list_page_bound is 3; page 4 is beyond the proactive bound.
    for page in 1..=4 {
        seed(
            &cache,
            CacheKey::PostList {
                page,
                category_id: Some(12),
            },
        )
        .await;
    }

    invalidator
        .blog(BlogScope {
            category_id: Some(12),
            ..BlogScope::default()
        })
        .await;

    for page in 1..=3 {
        assert!(
            cache
                .get_value(&CacheKey::PostList {
                    page,
                    category_id: Some(12),
                })
                .await
                .is_none()
        );
    }
    // Deeper pages are only reclaimed by TTL expiry.
    assert!(
        cache
            .get_value(&CacheKey::PostList {
                page: 4,
                category_id: Some(12),
            })
            .await
            .is_some()
    );
}

#[tokio::test]
async fn event_invalidation_sweeps_per_member_rsvp_checks() {
    let (cache, invalidator) = harness();

    seed(&cache, CacheKey::Event(3)).await;
    seed(&cache, CacheKey::EventRsvps(3)).await;
    seed(&cache, CacheKey::EventStats(3)).await;
    for member in ["u-1", "u-2", "u-3"] {
        seed(
            &cache,
            CacheKey::RsvpCheck {
                event_id: 3,
                user_id: member.to_string(),
            },
        )
        .await;
    }
    // A different event's check keys must survive.
    seed(
        &cache,
        CacheKey::RsvpCheck {
            event_id: 4,
            user_id: "u-1".to_string(),
        },
    )
    .await;

    invalidator
        .events(EventScope {
            event_id: Some(3),
            ..EventScope::default()
        })
        .await;

    assert!(cache.get_value(&CacheKey::Event(3)).await.is_none());
    assert!(cache.get_value(&CacheKey::EventRsvps(3)).await.is_none());
    for member in ["u-1", "u-2", "u-3"] {
        assert!(
            cache
                .get_value(&CacheKey::RsvpCheck {
                    event_id: 3,
                    user_id: member.to_string(),
                })
                .await
                .is_none()
        );
    }
    assert!(
        cache
            .get_value(&CacheKey::RsvpCheck {
                event_id: 4,
                user_id: "u-1".to_string(),
            })
            .await
            .is_some()
    );
}

#[tokio::test]
async fn user_concerns_are_independent() {
    let (cache, invalidator) = harness();

    let profile = CacheKey::UserProfile("u-1".to_string());
    seed(&cache, profile.clone()).await;
    let session_id = cache
        .set_session("u-1", json!({"role": "member"}), Ttl::Day)
        .await
        .unwrap();

    // A profile edit leaves active sessions alone.
    invalidator
        .users(
            "u-1",
            UserConcerns {
                profile: true,
                ..UserConcerns::default()
            },
        )
        .await;
    assert!(cache.get_value(&profile).await.is_none());
    assert!(cache.get_session(&session_id).await.is_some());

    // A security event revokes everything.
    seed(&cache, profile.clone()).await;
    invalidator
        .users(
            "u-1",
            UserConcerns {
                auth: true,
                ..UserConcerns::default()
            },
        )
        .await;
    assert!(cache.get_value(&profile).await.is_none());
    assert!(cache.get_session(&session_id).await.is_none());
}

#[tokio::test]
async fn doctrine_page_and_admin_invalidation() {
    let (cache, invalidator) = harness();

    seed(&cache, CacheKey::DoctrineBySlug("trinity".to_string())).await;
    seed(&cache, CacheKey::DoctrineList).await;
    seed(&cache, CacheKey::PageBySlug("about".to_string())).await;
    seed(&cache, CacheKey::AdminDashboard).await;
    seed(&cache, CacheKey::AdminStat("pending-comments".to_string())).await;

    invalidator
        .doctrines(DoctrineScope {
            slug: Some("trinity".to_string()),
            ..DoctrineScope::default()
        })
        .await;
    assert!(
        cache
            .get_value(&CacheKey::DoctrineBySlug("trinity".to_string()))
            .await
            .is_none()
    );
    assert!(cache.get_value(&CacheKey::DoctrineList).await.is_none());

    invalidator
        .pages(PageScope {
            slug: Some("about".to_string()),
            ..PageScope::default()
        })
        .await;
    assert!(
        cache
            .get_value(&CacheKey::PageBySlug("about".to_string()))
            .await
            .is_none()
    );

    invalidator
        .admin(AdminScope {
            stat: Some("pending-comments".to_string()),
            ..AdminScope::default()
        })
        .await;
    assert!(cache.get_value(&CacheKey::AdminDashboard).await.is_none());
    assert!(
        cache
            .get_value(&CacheKey::AdminStat("pending-comments".to_string()))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn clear_all_purges_content_but_spares_sessions_and_rate_limits() {
    let (cache, invalidator) = harness();

    seed(&cache, CacheKey::PostBySlug("advent".to_string())).await;
    seed(&cache, CacheKey::UpcomingEvents).await;
    seed(&cache, CacheKey::DoctrineList).await;
    seed(&cache, CacheKey::PageBySlug("about".to_string())).await;
    seed(&cache, CacheKey::UserProfile("u-1".to_string())).await;
    seed(&cache, CacheKey::AdminDashboard).await;
    seed(&cache, CacheKey::search("sunday service", 1)).await;
    let session_id = cache.set_session("u-1", json!({}), Ttl::Day).await.unwrap();
    cache.check_rate_limit("10.0.0.1", "login", 5, 60).await;

    let dropped = invalidator.clear_all().await;
    assert_eq!(dropped, 7);

    assert!(
        cache
            .get_value(&CacheKey::PostBySlug("advent".to_string()))
            .await
            .is_none()
    );
    assert!(
        cache
            .get_value(&CacheKey::search("sunday service", 1))
            .await
            .is_none()
    );
    // Members stay signed in and abuse limits stay armed.
    assert!(cache.get_session(&session_id).await.is_some());
    let verdict = cache.check_rate_limit("10.0.0.1", "login", 5, 60).await;
    assert_eq!(verdict.remaining, 3);
}

#[tokio::test]
async fn search_invalidation_is_a_namespace_purge() {
    let (cache, invalidator) = harness();

    seed(&cache, CacheKey::search("sunday service", 1)).await;
    seed(&cache, CacheKey::search("christmas eve", 2)).await;

    assert_eq!(invalidator.search().await, 2);
    assert!(
        cache
            .get_value(&CacheKey::search("sunday service", 1))
            .await
            .is_none()
    );
}

// ============================================================================
// Warmup
// ============================================================================

struct CountingSource {
    calls: AtomicUsize,
    fail_events: bool,
}

#[async_trait]
impl WarmupSource for CountingSource {
    async fn published_posts(&self, _page: u32) -> Result<Value, WarmupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!([{"slug": "advent"}]))
    }

    async fn featured_posts(&self) -> Result<Value, WarmupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!([{"slug": "welcome"}]))
    }

    async fn categories(&self) -> Result<Value, WarmupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!(["news", "devotional"]))
    }

    async fn upcoming_events(&self) -> Result<Value, WarmupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_events {
            Err(WarmupError::UpcomingEvents("source offline".to_string()))
        } else {
            Ok(json!([{"id": 1}]))
        }
    }
}

#[tokio::test]
async fn warmup_populates_the_hot_read_paths() {
    let (cache, _) = harness();
    let source = Arc::new(CountingSource {
        calls: AtomicUsize::new(0),
        fail_events: false,
    });

    let report = CacheWarmer::new(cache.clone(), source.clone()).warm().await;
    assert!(report.is_clean());
    assert_eq!(report.warmed.len(), 4);

    assert!(
        cache
            .get_value(&CacheKey::PostList {
                page: 1,
                category_id: None,
            })
            .await
            .is_some()
    );
    assert!(cache.get_value(&CacheKey::FeaturedPosts).await.is_some());
    assert!(cache.get_value(&CacheKey::Categories).await.is_some());
    assert!(cache.get_value(&CacheKey::UpcomingEvents).await.is_some());

    // A second pass is served from cache; the source is not re-queried.
    let before = source.calls.load(Ordering::SeqCst);
    let report = CacheWarmer::new(cache, source.clone()).warm().await;
    assert!(report.is_clean());
    assert_eq!(source.calls.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn warmup_continues_past_failing_steps() {
    let (cache, _) = harness();
    let source = Arc::new(CountingSource {
        calls: AtomicUsize::new(0),
        fail_events: true,
    });

    let report = CacheWarmer::new(cache.clone(), source).warm().await;
    assert_eq!(report.warmed.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "upcoming-events");

    assert!(cache.get_value(&CacheKey::Categories).await.is_some());
    assert!(cache.get_value(&CacheKey::UpcomingEvents).await.is_none());
}
