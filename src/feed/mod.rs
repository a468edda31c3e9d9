//! Everything that touches a feed before the crawler sees it.
//!
//! - [`opml`] - the feed directory: reading sources from OPML, writing it back
//! - [`fetcher`] - one bounded-timeout HTTP GET per source
//! - [`parser`] - bytes to entries, via `feed-rs`

pub mod fetcher;
pub mod opml;
pub mod parser;

pub use fetcher::{FetchError, FetchOutcome, FetchSettings, Fetcher, HttpFetcher, Validators};
pub use opml::{export_opml, parse_opml_content, DirectoryLocation, FeedSource, OpmlError};
pub use parser::{EntryParser, FeedRsParser, ParseError, ParseResult, RawEntry};
