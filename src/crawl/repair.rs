//! Directory repair: probe every source once and keep the ones that still
//! load and parse, so dead feeds can be pruned from the OPML.

use chrono::Utc;
use std::sync::Arc;

use super::entry::RecencyWindow;
use super::pool::run_pool;
use super::source::fetch_entries;
use crate::feed::{EntryParser, FeedRsParser, FeedSource, Fetcher};

pub const DEFAULT_REPAIR_CONCURRENCY: usize = 40;

#[derive(Clone)]
pub struct RepairConfig {
    pub concurrency_cap: usize,
    /// Only used to report how many recent entries each live feed has.
    pub recency_window: RecencyWindow,
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn EntryParser>,
}

impl RepairConfig {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            concurrency_cap: DEFAULT_REPAIR_CONCURRENCY,
            recency_window: RecencyWindow::repair(),
            fetcher,
            parser: Arc::new(FeedRsParser),
        }
    }
}

/// Sources split by whether they survived the probe, each in directory order.
#[derive(Debug, Default)]
pub struct RepairReport {
    pub live: Vec<FeedSource>,
    pub dead: Vec<FeedSource>,
}

pub async fn repair_directory(config: &RepairConfig, sources: Vec<FeedSource>) -> RepairReport {
    let now = Utc::now();
    let shared = Arc::new(config.clone());

    let probed = run_pool(
        sources.clone(),
        config.concurrency_cap.max(1),
        move |source: FeedSource| {
            let config = Arc::clone(&shared);
            async move {
                tracing::info!(feed = %source.title, "Probing feed");
                match fetch_entries(config.fetcher.as_ref(), config.parser.as_ref(), &source).await {
                    Ok(parsed) => {
                        let recent = parsed
                            .entries
                            .iter()
                            .filter(|e| config.recency_window.contains(e.published_at, now))
                            .count();
                        tracing::info!(
                            feed = %source.title,
                            fetched = parsed.entries.len(),
                            recent = recent,
                            "Feed is live"
                        );
                        true
                    }
                    Err(e) => {
                        tracing::warn!(feed = %source.title, url = %source.fetch_url, error = %e, "Feed is dead");
                        false
                    }
                }
            }
        },
    )
    .await;

    let mut report = RepairReport::default();
    for (source, alive) in sources.into_iter().zip(probed) {
        match alive {
            Some(true) => report.live.push(source),
            Some(false) => report.dead.push(source),
            None => {
                tracing::error!(feed = %source.title, "Feed probe panicked, treating as dead");
                report.dead.push(source);
            }
        }
    }

    tracing::info!(live = report.live.len(), dead = report.dead.len(), "Directory repair finished");
    report
}
