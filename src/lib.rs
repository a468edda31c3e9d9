//! Engineering blog aggregator.
//!
//! `crawl` pulls every feed in an OPML directory and stores the entries of
//! the last week in a dedup store; `build` turns the store into a JSON
//! listing; `repair` rewrites the directory without the feeds that stopped
//! loading.

pub mod aggregate;
pub mod config;
pub mod crawl;
pub mod feed;
pub mod storage;
pub mod util;
