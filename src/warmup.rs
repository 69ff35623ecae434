//! Cache warmup.
//!
//! After a bulk clear or a deploy the hottest read paths are guaranteed
//! cold; warming replays them through the normal fetch-through calls so
//! the first real visitors hit a populated cache instead of a miss storm.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::keys::CacheKey;
use crate::service::CacheService;
use crate::ttl::Ttl;

#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("failed to load published posts page {page}: {detail}")]
    PublishedPosts { page: u32, detail: String },
    #[error("failed to load featured posts: {0}")]
    FeaturedPosts(String),
    #[error("failed to load categories: {0}")]
    Categories(String),
    #[error("failed to load upcoming events: {0}")]
    UpcomingEvents(String),
}

/// Read side of the (excluded) data layer, as seen by warmup.
///
/// Implementations query the source of truth and return the same payloads
/// the application's fetch-through readers would cache.
#[async_trait]
pub trait WarmupSource: Send + Sync {
    async fn published_posts(&self, page: u32) -> Result<Value, WarmupError>;
    async fn featured_posts(&self) -> Result<Value, WarmupError>;
    async fn categories(&self) -> Result<Value, WarmupError>;
    async fn upcoming_events(&self) -> Result<Value, WarmupError>;
}

/// Outcome of one warmup pass.
#[derive(Debug, Default)]
pub struct WarmupReport {
    pub warmed: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl WarmupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pre-populates the highest-traffic read paths.
pub struct CacheWarmer {
    cache: CacheService,
    source: Arc<dyn WarmupSource>,
}

impl CacheWarmer {
    pub fn new(cache: CacheService, source: Arc<dyn WarmupSource>) -> Self {
        Self { cache, source }
    }

    /// Warm the public landing paths: first post page, featured strip,
    /// categories, upcoming events.
    ///
    /// Each step logs its outcome and failures never abort the pass;
    /// warmup is an optimization, exactly like the cache itself.
    pub async fn warm(&self) -> WarmupReport {
        if !self.cache.is_available() {
            info!("cache warmup skipped: backend unavailable");
            return WarmupReport::default();
        }

        let mut report = WarmupReport::default();

        let source = self.source.clone();
        self.warm_step(
            &mut report,
            "published-posts",
            CacheKey::PostList {
                page: 1,
                category_id: None,
            },
            Ttl::Medium,
            move || async move { source.published_posts(1).await },
        )
        .await;

        let source = self.source.clone();
        self.warm_step(
            &mut report,
            "featured-posts",
            CacheKey::FeaturedPosts,
            Ttl::Hour,
            move || async move { source.featured_posts().await },
        )
        .await;

        let source = self.source.clone();
        self.warm_step(
            &mut report,
            "categories",
            CacheKey::Categories,
            Ttl::Hour,
            move || async move { source.categories().await },
        )
        .await;

        let source = self.source.clone();
        self.warm_step(
            &mut report,
            "upcoming-events",
            CacheKey::UpcomingEvents,
            Ttl::Medium,
            move || async move { source.upcoming_events().await },
        )
        .await;

        info!(
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            "cache warmup completed"
        );
        report
    }

    async fn warm_step<F, Fut>(
        &self,
        report: &mut WarmupReport,
        step: &'static str,
        key: CacheKey,
        ttl: Ttl,
        fetcher: F,
    ) where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, WarmupError>> + Send + 'static,
    {
        match self
            .cache
            .get_or_set(&key, ttl, crate::ttl::FetchOptions::default(), fetcher)
            .await
        {
            Ok(_) => {
                info!(step, key = %key, "cache entry warmed");
                report.warmed.push(step);
            }
            Err(err) => {
                warn!(step, key = %key, error = %err, "cache warmup step failed");
                report.failed.push((step, err.to_string()));
            }
        }
    }
}
