use thiserror::Error;

use crate::feed::{
    EntryParser, FeedSource, FetchError, FetchOutcome, Fetcher, ParseError, ParseResult, Validators,
};

/// Why a source produced nothing this pass.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
}

/// Downloads and parses one source. No partial results: either every entry
/// the parser produced, or the first error.
pub async fn fetch_entries(
    fetcher: &dyn Fetcher,
    parser: &dyn EntryParser,
    source: &FeedSource,
) -> Result<ParseResult, SourceError> {
    let bytes = fetcher.fetch(&source.fetch_url).await?;
    Ok(parser.parse(&bytes)?)
}

/// What a conditional fetch of one source produced.
#[derive(Debug)]
pub enum SourceFetch {
    Parsed {
        result: ParseResult,
        validators: Validators,
    },
    /// The server answered 304; nothing new since the last full fetch.
    Unchanged,
}

/// Like [`fetch_entries`], but sends the source's cached validators and
/// passes a 304 through as [`SourceFetch::Unchanged`].
pub async fn fetch_entries_conditional(
    fetcher: &dyn Fetcher,
    parser: &dyn EntryParser,
    source: &FeedSource,
    validators: &Validators,
) -> Result<SourceFetch, SourceError> {
    match fetcher.fetch_conditional(&source.fetch_url, validators).await? {
        FetchOutcome::NotModified => Ok(SourceFetch::Unchanged),
        FetchOutcome::Fetched { body, validators } => Ok(SourceFetch::Parsed {
            result: parser.parse(&body)?,
            validators,
        }),
    }
}
