//! Cache key definitions.
//!
//! Every cached artifact in the platform has exactly one constructor here.
//! `Display` renders the colon-delimited wire string, which is the only
//! place key strings are assembled; the invalidation layer consumes the
//! same enums, so read-side caching and write-side invalidation cannot
//! drift apart.

use std::fmt;

/// Identifies one cached value.
///
/// Key construction is a pure function of its parameters: the same inputs
/// always render the same wire string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    // Blog
    /// A published post looked up by its URL slug.
    PostBySlug(String),
    /// A post looked up by its database id (admin paths).
    PostById(i64),
    /// One page of the post listing, optionally scoped to a category.
    PostList { page: u32, category_id: Option<i64> },
    /// The featured-posts strip on the homepage.
    FeaturedPosts,
    /// The trending-posts sidebar.
    TrendingPosts,
    /// All blog categories with post counts.
    Categories,
    /// View/comment counters for one post.
    PostStats(i64),
    /// Related-posts recommendations for one post.
    RelatedPosts(i64),

    // Events
    /// A single event by id.
    Event(i64),
    /// One page of the public event listing.
    EventList { page: u32 },
    /// The upcoming-events strip.
    UpcomingEvents,
    /// The RSVP roster for one event.
    EventRsvps(i64),
    /// Attendance aggregates for one event (admin).
    EventStats(i64),
    /// Whether one member has RSVP'd to one event.
    RsvpCheck { event_id: i64, user_id: String },

    // Doctrines
    /// A doctrine page by slug.
    DoctrineBySlug(String),
    /// The doctrine index.
    DoctrineList,

    // Site pages
    /// A marketing/content page by slug (about, donate, ...).
    PageBySlug(String),

    // Members
    /// A member's public profile.
    UserProfile(String),
    /// The set of active session ids for one member.
    UserSessionSet(String),
    /// A single session payload.
    Session(String),

    // Admin
    /// Aggregates backing the admin dashboard landing page.
    AdminDashboard,
    /// A named admin statistic (e.g. `pending-comments`).
    AdminStat(String),

    // Search
    /// One page of search results for a normalized query.
    Search { query: String, page: u32 },

    // Rate limiting
    /// Request counter for (resource, identifier) within one window.
    RateLimit {
        resource: String,
        identifier: String,
    },
}

impl CacheKey {
    /// Build a search key from a raw user query.
    ///
    /// The query is normalized (trimmed, lowercased, whitespace collapsed)
    /// so equivalent queries share one cache entry.
    pub fn search(query: &str, page: u32) -> Self {
        let normalized = query
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self::Search {
            query: normalized,
            page,
        }
    }

    /// The wire string stored in the backend.
    pub fn wire(&self) -> String {
        self.to_string()
    }

    /// Auxiliary key marking an in-flight background revalidation.
    pub fn stale_marker(&self) -> String {
        format!("{self}:stale")
    }

    /// Auxiliary key used as a set-if-absent fetch lock.
    pub fn lock(&self) -> String {
        format!("{self}:lock")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::PostBySlug(slug) => write!(f, "blog:post:slug:{slug}"),
            CacheKey::PostById(id) => write!(f, "blog:post:id:{id}"),
            CacheKey::PostList {
                page,
                category_id: Some(category_id),
            } => write!(f, "blog:posts:cat:{category_id}:page:{page}"),
            CacheKey::PostList {
                page,
                category_id: None,
            } => write!(f, "blog:posts:page:{page}"),
            CacheKey::FeaturedPosts => write!(f, "blog:featured"),
            CacheKey::TrendingPosts => write!(f, "blog:trending"),
            CacheKey::Categories => write!(f, "blog:categories"),
            CacheKey::PostStats(id) => write!(f, "blog:stats:{id}"),
            CacheKey::RelatedPosts(id) => write!(f, "blog:related:{id}"),
            CacheKey::Event(id) => write!(f, "events:event:{id}"),
            CacheKey::EventList { page } => write!(f, "events:page:{page}"),
            CacheKey::UpcomingEvents => write!(f, "events:upcoming"),
            CacheKey::EventRsvps(id) => write!(f, "events:rsvps:{id}"),
            CacheKey::EventStats(id) => write!(f, "events:stats:{id}"),
            CacheKey::RsvpCheck { event_id, user_id } => {
                write!(f, "events:rsvp-check:{event_id}:{user_id}")
            }
            CacheKey::DoctrineBySlug(slug) => write!(f, "doctrines:slug:{slug}"),
            CacheKey::DoctrineList => write!(f, "doctrines:list"),
            CacheKey::PageBySlug(slug) => write!(f, "pages:slug:{slug}"),
            CacheKey::UserProfile(user_id) => write!(f, "users:profile:{user_id}"),
            CacheKey::UserSessionSet(user_id) => write!(f, "users:sessions:{user_id}"),
            CacheKey::Session(session_id) => write!(f, "sessions:{session_id}"),
            CacheKey::AdminDashboard => write!(f, "admin:dashboard"),
            CacheKey::AdminStat(name) => write!(f, "admin:stat:{name}"),
            CacheKey::Search { query, page } => {
                let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
                write!(f, "search:{encoded}:page:{page}")
            }
            CacheKey::RateLimit {
                resource,
                identifier,
            } => write!(f, "ratelimit:{resource}:{identifier}"),
        }
    }
}

/// Glob patterns for bulk deletion, one per key namespace.
///
/// Pattern deletion walks the backend keyspace with a cursor and is
/// expensive; these are meant for invalidation fallbacks and operational
/// tooling, not per-request paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Blog,
    Events,
    Doctrines,
    Pages,
    UserProfiles,
    UserSessionSets,
    Sessions,
    Admin,
    Search,
    RateLimits,
    /// Every per-member RSVP check for one event.
    EventRsvpChecks(i64),
}

impl KeyPattern {
    /// Patterns purged by a full cache clear.
    ///
    /// Sessions and rate-limit counters are deliberately excluded: clearing
    /// content caches must not log members out or lift abuse limits.
    pub fn clearable() -> &'static [KeyPattern] {
        &[
            KeyPattern::Blog,
            KeyPattern::Events,
            KeyPattern::Doctrines,
            KeyPattern::Pages,
            KeyPattern::UserProfiles,
            KeyPattern::Admin,
            KeyPattern::Search,
        ]
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Blog => write!(f, "blog:*"),
            KeyPattern::Events => write!(f, "events:*"),
            KeyPattern::Doctrines => write!(f, "doctrines:*"),
            KeyPattern::Pages => write!(f, "pages:*"),
            KeyPattern::UserProfiles => write!(f, "users:profile:*"),
            KeyPattern::UserSessionSets => write!(f, "users:sessions:*"),
            KeyPattern::Sessions => write!(f, "sessions:*"),
            KeyPattern::Admin => write!(f, "admin:*"),
            KeyPattern::Search => write!(f, "search:*"),
            KeyPattern::RateLimits => write!(f, "ratelimit:*"),
            KeyPattern::EventRsvpChecks(event_id) => {
                write!(f, "events:rsvp-check:{event_id}:*")
            }
        }
    }
}
