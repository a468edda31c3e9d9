//! Derivation of the store's keys and expiry watermark from an entry.
//!
//! Everything here is a pure function of its input, so two crawls of the same
//! entry, in the same process or not, address the same record.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use super::types::{NormalizedEntry, StoreRecord};

/// How long after publication a record stays visible: one week plus an hour
/// of slack so an entry never expires between two daily crawls.
pub const RECORD_LIFETIME_SECS: i64 = 7 * 86_400 + 3_600;

pub fn dedup_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

pub fn partition_key(published_at: DateTime<Utc>) -> String {
    published_at.format("%Y-%m-%d").to_string()
}

pub fn expires_at(published_at: DateTime<Utc>) -> i64 {
    published_at.timestamp() + RECORD_LIFETIME_SECS
}

impl From<&NormalizedEntry> for StoreRecord {
    fn from(entry: &NormalizedEntry) -> Self {
        StoreRecord {
            dedup_key: dedup_key(&entry.url),
            partition_key: partition_key(entry.published_at),
            published_at: entry
                .published_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            expires_at: expires_at(entry.published_at),
            title: entry.title.clone(),
            url: entry.url.clone(),
            feed_title: entry.feed_title.clone(),
            feed_site_url: entry.feed_site_url.clone(),
        }
    }
}
