//! The crawl pipeline.
//!
//! A [`Scheduler`] takes the sources of one pass, hands them to a fixed pool
//! of workers ([`pool`]), and for each source runs fetch → parse → normalise →
//! recency filter → store, strictly in that order. Fetches are conditional
//! when a validator cache is configured; a 304 ends the source early. Sources never affect each
//! other: a source that fails to fetch or parse is logged and counted, and a
//! write that fails skips only its own entry.
//!
//! [`repair`] reuses the same pool and fetch/parse step to find sources that
//! no longer load.

mod entry;
pub mod pool;
pub mod repair;
mod scheduler;
mod source;

pub use entry::{normalize, RecencyWindow};
pub use repair::{repair_directory, RepairConfig, RepairReport};
pub use scheduler::{CrawlConfig, CrawlSummary, Scheduler, DEFAULT_CONCURRENCY_CAP};
pub use source::{fetch_entries, fetch_entries_conditional, SourceError, SourceFetch};
