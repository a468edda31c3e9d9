//! Read side: turns the store's contents into the published listing.
//!
//! Entries dated in the future are stored by the crawler as-is and only hidden
//! here, at build time, so they appear on their own once their date passes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::storage::{DedupStore, StoreRecord};

pub const LISTING_FILE: &str = "entries.json";

/// Newest first, with anything published strictly after `now` left out.
pub fn aggregate(records: Vec<StoreRecord>, now: DateTime<Utc>) -> Vec<StoreRecord> {
    let mut visible: Vec<(DateTime<Utc>, StoreRecord)> = records
        .into_iter()
        .filter_map(|record| match record.published() {
            Some(published) => Some((published, record)),
            None => {
                tracing::warn!(key = %record.dedup_key, published = %record.published_at, "Unreadable publish date, entry hidden");
                None
            }
        })
        .filter(|(published, _)| *published <= now)
        .collect();

    visible.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.url.cmp(&b.1.url)));
    visible.into_iter().map(|(_, record)| record).collect()
}

#[derive(Debug)]
pub struct BuildReport {
    pub listing_path: PathBuf,
    pub scanned: usize,
    pub published: usize,
}

/// Scans the store and writes `entries.json` into `output_dir`.
pub async fn build(store: &dyn DedupStore, output_dir: &Path) -> Result<BuildReport> {
    let records = store.scan().await.context("Failed to scan entry store")?;
    let scanned = records.len();
    let entries = aggregate(records, Utc::now());

    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

    let listing_path = output_dir.join(LISTING_FILE);
    let body = serde_json::to_vec(&entries).context("Failed to serialize entry listing")?;
    write_atomically(&listing_path, &body).await?;

    tracing::info!(
        path = %listing_path.display(),
        scanned = scanned,
        published = entries.len(),
        "Listing written"
    );

    Ok(BuildReport {
        listing_path,
        scanned,
        published: entries.len(),
    })
}

/// Write to a sibling temp file then rename over the destination, so readers
/// never see a partial listing.
async fn write_atomically(path: &Path, body: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    tokio::fs::write(&temp_path, body)
        .await
        .with_context(|| format!("Failed to write temporary file '{}'", temp_path.display()))?;

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e).with_context(|| {
            format!(
                "Failed to rename '{}' to '{}'",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}
