//! cachectl: operational entry points for the Ekklesia cache layer.
//!
//! Thin wrapper over the library's health and invalidation operations for
//! deploy scripts and on-call use. Exits non-zero when the backend cannot
//! be reached, so pipelines can gate on connectivity.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use ekklesia_cache::{
    AdminScope, BlogScope, CacheService, DoctrineScope, EventScope, Invalidator, PageScope,
    Settings, telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "cachectl", version, about = "Ekklesia cache operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check backend connectivity and round-trip latency.
    Health,
    /// Purge every clearable cache namespace (content caches only;
    /// sessions and rate limits are untouched).
    ClearAll,
    /// Purge a single domain's namespace.
    Clear {
        #[arg(value_enum)]
        domain: Domain,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Domain {
    Blog,
    Events,
    Doctrines,
    Pages,
    Admin,
    Search,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("cachectl: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = telemetry::init(&settings.logging) {
        eprintln!("cachectl: {err}");
        return ExitCode::FAILURE;
    }

    let cache = CacheService::from_settings(&settings.cache);
    match cli.command {
        Command::Health => health(&cache).await,
        Command::ClearAll => clear_all(cache).await,
        Command::Clear { domain } => clear_domain(cache, domain).await,
    }
}

async fn health(cache: &CacheService) -> ExitCode {
    if !cache.is_available() {
        eprintln!("backend not configured (set EKKLESIA_KV_REST_URL and EKKLESIA_KV_REST_TOKEN)");
        return ExitCode::FAILURE;
    }

    let info = cache.info().await;
    match (info.connected, info.latency) {
        (true, Some(latency)) => {
            let endpoint = info.endpoint.as_deref().unwrap_or("<unknown>");
            println!("backend {endpoint}: connected ({} ms)", latency.as_millis());
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("backend unreachable");
            ExitCode::FAILURE
        }
    }
}

async fn clear_all(cache: CacheService) -> ExitCode {
    let Some(invalidator) = require_backend(cache).await else {
        return ExitCode::FAILURE;
    };

    println!("clearing all content caches...");
    let dropped = invalidator.clear_all().await;
    println!("done: {dropped} keys removed");
    ExitCode::SUCCESS
}

async fn clear_domain(cache: CacheService, domain: Domain) -> ExitCode {
    let Some(invalidator) = require_backend(cache).await else {
        return ExitCode::FAILURE;
    };

    println!("clearing {domain:?} cache...");
    let dropped = match domain {
        Domain::Blog => {
            invalidator
                .blog(BlogScope {
                    all: true,
                    ..BlogScope::default()
                })
                .await
        }
        Domain::Events => {
            invalidator
                .events(EventScope {
                    all: true,
                    ..EventScope::default()
                })
                .await
        }
        Domain::Doctrines => {
            invalidator
                .doctrines(DoctrineScope {
                    all: true,
                    ..DoctrineScope::default()
                })
                .await
        }
        Domain::Pages => {
            invalidator
                .pages(PageScope {
                    all: true,
                    ..PageScope::default()
                })
                .await
        }
        Domain::Admin => {
            invalidator
                .admin(AdminScope {
                    all: true,
                    ..AdminScope::default()
                })
                .await
        }
        Domain::Search => invalidator.search().await,
    };
    println!("done: {dropped} keys removed");
    ExitCode::SUCCESS
}

/// Clear operations refuse to run against an absent or unreachable backend
/// rather than silently no-op'ing in a deploy pipeline.
async fn require_backend(cache: CacheService) -> Option<Invalidator> {
    if !cache.is_available() {
        eprintln!("backend not configured (set EKKLESIA_KV_REST_URL and EKKLESIA_KV_REST_TOKEN)");
        return None;
    }
    if !cache.ping().await {
        eprintln!("backend unreachable");
        return None;
    }
    Some(Invalidator::new(cache))
}
