use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::entry::{normalize, RecencyWindow};
use super::pool::run_pool;
use super::source::{fetch_entries_conditional, SourceFetch};
use crate::feed::{EntryParser, FeedRsParser, FeedSource, Fetcher, Validators};
use crate::storage::{DedupStore, NormalizedEntry, StoreRecord, ValidatorCache};

/// Default number of sources crawled at once.
pub const DEFAULT_CONCURRENCY_CAP: usize = 20;

/// Everything a crawl run depends on, passed in explicitly.
#[derive(Clone)]
pub struct CrawlConfig {
    pub concurrency_cap: usize,
    pub recency_window: RecencyWindow,
    /// Funnel every store write of a run through one lock. When false the
    /// store's own concurrency safety is relied on.
    pub serialize_writes: bool,
    pub store: Arc<dyn DedupStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn EntryParser>,
    /// Where per-feed ETag / Last-Modified values live between passes. Without
    /// one every fetch is unconditional.
    pub validator_cache: Option<Arc<dyn ValidatorCache>>,
}

impl CrawlConfig {
    pub fn new(store: Arc<dyn DedupStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            concurrency_cap: DEFAULT_CONCURRENCY_CAP,
            recency_window: RecencyWindow::crawl(),
            serialize_writes: true,
            store,
            fetcher,
            parser: Arc::new(FeedRsParser),
            validator_cache: None,
        }
    }

    pub fn with_concurrency_cap(mut self, cap: usize) -> Self {
        self.concurrency_cap = cap;
        self
    }

    pub fn with_recency_window(mut self, window: RecencyWindow) -> Self {
        self.recency_window = window;
        self
    }

    pub fn with_serialized_writes(mut self, serialize: bool) -> Self {
        self.serialize_writes = serialize;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn EntryParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_validator_cache(mut self, cache: Arc<dyn ValidatorCache>) -> Self {
        self.validator_cache = Some(cache);
        self
    }
}

/// Counts for one crawl pass. A run never fails as a whole; callers that
/// want alerting look at `failed` and `entries_stored`.
///
/// `unchanged` sources answered 304 and are also counted in `succeeded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub entries_stored: usize,
}

enum SourceOutcome {
    Failed,
    Unchanged,
    Crawled { stored: usize },
}

/// State shared by the workers of a single run.
struct RunContext {
    now: DateTime<Utc>,
    write_lock: Mutex<()>,
}

/// Drives fetch, parse, filter and store for every source of a pass.
#[derive(Clone)]
pub struct Scheduler {
    config: Arc<CrawlConfig>,
}

impl Scheduler {
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Runs one pass over `sources` and returns once every source finished.
    ///
    /// Sources listed twice (same fetch URL) are crawled once. Failures of a
    /// source or of a single write are logged and counted, never returned.
    pub async fn run(&self, sources: Vec<FeedSource>) -> CrawlSummary {
        let sources = dedupe_sources(sources);
        let attempted = sources.len();
        let cap = self.config.concurrency_cap.max(1);

        tracing::info!(
            sources = attempted,
            concurrency = cap,
            window_hours = self.config.recency_window.duration().num_hours(),
            "Starting crawl"
        );

        let ctx = Arc::new(RunContext {
            now: Utc::now(),
            write_lock: Mutex::new(()),
        });
        let config = Arc::clone(&self.config);
        let titles: Vec<String> = sources.iter().map(|s| s.title.clone()).collect();

        let outcomes = run_pool(sources, cap, move |source| {
            let config = Arc::clone(&config);
            let ctx = Arc::clone(&ctx);
            async move { crawl_source(&config, &ctx, &source).await }
        })
        .await;

        let mut summary = CrawlSummary {
            attempted,
            ..CrawlSummary::default()
        };
        for (title, outcome) in titles.iter().zip(outcomes) {
            match outcome {
                None => {
                    tracing::error!(feed = %title, "Feed crawl panicked, counted as failed");
                    summary.failed += 1;
                }
                Some(SourceOutcome::Failed) => summary.failed += 1,
                Some(SourceOutcome::Unchanged) => {
                    summary.succeeded += 1;
                    summary.unchanged += 1;
                }
                Some(SourceOutcome::Crawled { stored }) => {
                    summary.succeeded += 1;
                    summary.entries_stored += stored;
                }
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            unchanged = summary.unchanged,
            stored = summary.entries_stored,
            "Crawl finished"
        );
        summary
    }
}

async fn crawl_source(config: &CrawlConfig, ctx: &RunContext, source: &FeedSource) -> SourceOutcome {
    tracing::info!(feed = %source.title, url = %source.fetch_url, "Crawling feed");

    let cached = load_validators(config, source).await;

    let attempt = fetch_entries_conditional(
        config.fetcher.as_ref(),
        config.parser.as_ref(),
        source,
        &cached,
    )
    .await;
    let (parsed, validators) = match attempt {
        Ok(SourceFetch::Parsed { result, validators }) => (result, validators),
        Ok(SourceFetch::Unchanged) => {
            tracing::info!(feed = %source.title, "Feed not modified since last pass");
            return SourceOutcome::Unchanged;
        }
        Err(e) => {
            tracing::warn!(
                feed = %source.title,
                url = %source.fetch_url,
                error = %e,
                "Feed skipped"
            );
            return SourceOutcome::Failed;
        }
    };

    let fetched = parsed.entries.len();
    let recent: Vec<NormalizedEntry> = parsed
        .entries
        .into_iter()
        .map(|raw| normalize(raw, source))
        .filter(|entry| config.recency_window.contains(entry.published_at, ctx.now))
        .collect();

    tracing::info!(
        feed = %source.title,
        fetched = fetched,
        recent = recent.len(),
        unusable = parsed.skipped,
        "Fetched entries"
    );

    let stored = store_entries(config, ctx, source, &recent).await;

    // A failed write must be retried next pass, which a 304 would prevent
    let remember = if stored == recent.len() {
        validators
    } else {
        Validators::default()
    };
    save_validators(config, source, &remember).await;

    SourceOutcome::Crawled { stored }
}

async fn load_validators(config: &CrawlConfig, source: &FeedSource) -> Validators {
    let Some(cache) = &config.validator_cache else {
        return Validators::default();
    };
    match cache.load_validators(&source.fetch_url).await {
        Ok(validators) => validators,
        Err(e) => {
            tracing::warn!(feed = %source.title, error = %e, "Could not read cached validators");
            Validators::default()
        }
    }
}

async fn save_validators(config: &CrawlConfig, source: &FeedSource, validators: &Validators) {
    let Some(cache) = &config.validator_cache else {
        return;
    };
    if let Err(e) = cache.save_validators(&source.fetch_url, validators).await {
        tracing::warn!(feed = %source.title, error = %e, "Could not cache validators");
    }
}

/// Writes a source's entries in order; a failed write skips only that entry.
async fn store_entries(
    config: &CrawlConfig,
    ctx: &RunContext,
    source: &FeedSource,
    entries: &[NormalizedEntry],
) -> usize {
    if entries.is_empty() {
        return 0;
    }

    let _guard = if config.serialize_writes {
        Some(ctx.write_lock.lock().await)
    } else {
        None
    };

    let mut stored = 0;
    for entry in entries {
        let record = StoreRecord::from(entry);
        match config.store.put(&record).await {
            Ok(()) => {
                stored += 1;
                tracing::debug!(feed = %source.title, url = %record.url, key = %record.dedup_key, "Entry stored");
            }
            Err(e) => {
                tracing::warn!(
                    feed = %source.title,
                    url = %record.url,
                    error = %e,
                    "Store write failed"
                );
            }
        }
    }
    stored
}

/// Keeps the first declaration of every fetch URL.
fn dedupe_sources(sources: Vec<FeedSource>) -> Vec<FeedSource> {
    let before = sources.len();
    let mut seen = HashSet::new();
    let unique: Vec<FeedSource> = sources
        .into_iter()
        .filter(|s| seen.insert(s.fetch_url.clone()))
        .collect();

    if unique.len() < before {
        tracing::info!(duplicates = before - unique.len(), "Dropped duplicate feed sources");
    }
    unique
}
