use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

use crate::feed::fetcher::Fetcher;
use crate::util::validate_feed_url;

/// Maximum allowed nesting depth for outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Title of the category outline wrapping every feed in a written directory.
pub const DIRECTORY_TITLE: &str = "Engineering Blogs";

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// One feed declared in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    /// `title` attribute, falling back to `text`, then to the fetch URL.
    pub title: String,
    /// `xmlUrl`: where the RSS/Atom document is downloaded from.
    pub fetch_url: String,
    /// `htmlUrl`: the blog itself. Empty when the outline has none.
    pub site_url: String,
}

/// Where the directory document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryLocation {
    File(PathBuf),
    Remote(String),
}

impl DirectoryLocation {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            DirectoryLocation::Remote(location.to_string())
        } else {
            DirectoryLocation::File(PathBuf::from(location))
        }
    }
}

impl std::fmt::Display for DirectoryLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryLocation::File(path) => write!(f, "{}", path.display()),
            DirectoryLocation::Remote(url) => f.write_str(url),
        }
    }
}

/// Reads the directory from disk or over HTTP and extracts its feeds.
///
/// Remote directories go through the same [`Fetcher`] (and the same timeouts)
/// as the feeds themselves.
pub async fn load(location: &DirectoryLocation, fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>> {
    let content = match location {
        DirectoryLocation::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(OpmlError::Io)
            .with_context(|| format!("Failed to read OPML file: {}", path.display()))?,
        DirectoryLocation::Remote(url) => {
            let bytes = fetcher
                .fetch(url)
                .await
                .with_context(|| format!("Failed to download OPML from {url}"))?;
            String::from_utf8(bytes).context("OPML document is not valid UTF-8")?
        }
    };

    let sources = parse_opml_content(&content)?;
    tracing::info!(directory = %location, feeds = sources.len(), "Loaded feed directory");
    Ok(sources)
}

/// Extracts every `<outline>` carrying an `xmlUrl`, at any nesting depth.
///
/// Folder outlines are walked but not returned. Outlines whose feed URL is not
/// a public http(s) address are skipped with a warning.
pub fn parse_opml_content(content: &str) -> Result<Vec<FeedSource>> {
    // quick-xml never expands <!ENTITY> declarations; unknown entities error out.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut sources = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH).into());
                }
                if let Some(source) = outline_to_source(&e, &reader)? {
                    sources.push(source);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Some(source) = outline_to_source(&e, &reader)? {
                    sources.push(source);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string()).into()),
            _ => {}
        }
    }

    Ok(sources)
}

fn outline_to_source(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<FeedSource>> {
    let mut fetch_url = None;
    let mut site_url = None;
    let mut title = None;
    let mut text = None;

    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || -> Result<String> {
            Ok(attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))?
                .trim()
                .to_string())
        };
        // Attribute names vary in case between exporters (xmlUrl / xmlurl)
        match attr.key.as_ref().to_ascii_lowercase().as_slice() {
            b"xmlurl" => fetch_url = Some(value()?),
            b"htmlurl" => site_url = Some(value()?),
            b"title" => title = Some(value()?),
            b"text" => text = Some(value()?),
            _ => {}
        }
    }

    let Some(fetch_url) = fetch_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    if let Err(e) = validate_feed_url(&fetch_url) {
        tracing::warn!(url = %fetch_url, error = %e, "Skipping invalid feed URL");
        return Ok(None);
    }

    let title = title
        .filter(|t| !t.is_empty())
        .or(text.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| fetch_url.clone());

    Ok(Some(FeedSource {
        title,
        fetch_url,
        site_url: site_url.unwrap_or_default(),
    }))
}

/// Writes sources as an OPML document, all feeds under one category outline.
pub fn export_opml(sources: &[FeedSource]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "1.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    for event in [
        Event::Start(BytesStart::new("head")),
        Event::Start(BytesStart::new("title")),
        Event::Text(BytesText::new(DIRECTORY_TITLE)),
        Event::End(BytesEnd::new("title")),
        Event::End(BytesEnd::new("head")),
    ] {
        writer
            .write_event(event)
            .context("Failed to write head element")?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    let mut category = BytesStart::new("outline");
    category.push_attribute(("text", DIRECTORY_TITLE));
    category.push_attribute(("title", DIRECTORY_TITLE));
    writer
        .write_event(Event::Start(category))
        .context("Failed to write category outline")?;

    for source in sources {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", source.title.as_str()));
        outline.push_attribute(("title", source.title.as_str()));
        outline.push_attribute(("xmlUrl", source.fetch_url.as_str()));
        if !source.site_url.is_empty() {
            outline.push_attribute(("htmlUrl", source.site_url.as_str()));
        }
        writer
            .write_event(Event::Empty(outline))
            .context("Failed to write outline element")?;
    }

    for end in ["outline", "body", "opml"] {
        writer
            .write_event(Event::End(BytesEnd::new(end)))
            .with_context(|| format!("Failed to close {end} element"))?;
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("Generated OPML contains invalid UTF-8")
}
