use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser::{ParseErrorKind, ParseFeedError};
use thiserror::Error;

/// Why a fetched body could not be turned into entries.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is well-formed but is not RSS, Atom or JSON Feed.
    #[error("Unsupported feed format: {0}")]
    UnsupportedFormat(String),
    /// The document looked like a feed but could not be read.
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

impl From<ParseFeedError> for ParseError {
    fn from(err: ParseFeedError) -> Self {
        match err {
            ParseFeedError::ParseError(ParseErrorKind::NoFeedRoot)
            | ParseFeedError::ParseError(ParseErrorKind::UnknownMimeType(_))
            | ParseFeedError::JsonUnsupportedVersion(_) => {
                ParseError::UnsupportedFormat(err.to_string())
            }
            other => ParseError::Malformed(other.to_string()),
        }
    }
}

/// One item of a feed, before it is attached to its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
}

/// Entries read from one document plus the number of items that had to be
/// dropped because they carried no link or no timestamp.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub entries: Vec<RawEntry>,
    pub skipped: usize,
}

/// Turns raw feed bytes into entries.
///
/// The crawler only depends on this contract; the format work is delegated.
pub trait EntryParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParseResult, ParseError>;
}

/// [`EntryParser`] backed by `feed-rs` (RSS 0.9x/1.0/2.0, Atom, JSON Feed).
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedRsParser;

impl EntryParser for FeedRsParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParseResult, ParseError> {
        let feed = feed_rs::parser::parse(bytes)?;

        let mut result = ParseResult::default();
        for entry in feed.entries {
            match into_raw_entry(entry) {
                Some(raw) => result.entries.push(raw),
                None => result.skipped += 1,
            }
        }
        Ok(result)
    }
}

fn into_raw_entry(entry: Entry) -> Option<RawEntry> {
    let published_at = entry.published.or(entry.updated)?;
    let url = entry_url(&entry.links, &entry.id)?;
    let title = entry.title.map(|t| t.content).unwrap_or_default();

    Some(RawEntry {
        published_at,
        title,
        url,
    })
}

/// Prefers the alternate link, then any link, then an id that is itself a URL.
fn entry_url(links: &[Link], id: &str) -> Option<String> {
    let alternate = links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("") | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim())
        .filter(|href| !href.is_empty());

    if let Some(href) = alternate {
        return Some(href.to_string());
    }

    let id = id.trim();
    (id.starts_with("http://") || id.starts_with("https://")).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example Engineering</title>
    <item>
        <title>  Scaling the build farm </title>
        <link>https://example.com/build-farm</link>
        <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
    </item>
    <item>
        <title>No date here</title>
        <link>https://example.com/undated</link>
    </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Blog</title>
    <id>urn:atom-blog</id>
    <updated>2024-02-01T00:00:00Z</updated>
    <entry>
        <title>Replies</title>
        <id>urn:entry:1</id>
        <link rel="replies" href="https://example.com/post/1#comments"/>
        <link rel="alternate" href="https://example.com/post/1"/>
        <updated>2024-02-01T09:30:00Z</updated>
    </entry>
    <entry>
        <title>Id only</title>
        <id>https://example.com/post/2</id>
        <published>2024-02-02T09:30:00Z</published>
        <updated>2024-02-03T09:30:00Z</updated>
    </entry>
</feed>"#;

    #[test]
    fn test_rss_items_become_entries() {
        let result = FeedRsParser.parse(RSS.as_bytes()).unwrap();

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.skipped, 1);
        let entry = &result.entries[0];
        assert_eq!(entry.url, "https://example.com/build-farm");
        assert_eq!(
            entry.published_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_atom_prefers_alternate_link_and_published() {
        let result = FeedRsParser.parse(ATOM.as_bytes()).unwrap();
        assert_eq!(result.entries.len(), 2);

        assert_eq!(result.entries[0].url, "https://example.com/post/1");
        assert_eq!(
            result.entries[0].published_at,
            Utc.with_ymd_and_hms(2024, 2, 1, 9, 30, 0).unwrap()
        );

        assert_eq!(result.entries[1].url, "https://example.com/post/2");
        assert_eq!(
            result.entries[1].published_at,
            Utc.with_ymd_and_hms(2024, 2, 2, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_html_page_is_unsupported_format() {
        let err = FeedRsParser
            .parse(b"<html><body><p>Not a feed</p></body></html>")
            .unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)), "{err:?}");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(FeedRsParser.parse(b"<not valid xml").is_err());
    }

    #[test]
    fn test_entry_url_ignores_non_url_ids() {
        assert_eq!(entry_url(&[], "urn:uuid:1234"), None);
        assert_eq!(
            entry_url(&[], " https://example.com/a "),
            Some("https://example.com/a".to_string())
        );
    }
}
