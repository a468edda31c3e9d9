use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// A failed store operation. Always scoped to a single entry by the crawler.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted or closed, I/O failure).
    #[error("Store unavailable: {0}")]
    ServiceUnavailable(String),

    /// The store refused the write under contention (SQLITE_BUSY / SQLITE_LOCKED).
    #[error("Store throttled: {0}")]
    Throttled(String),

    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => StoreError::ServiceUnavailable(err.to_string()),
            other => {
                let message = other.to_string();
                let lowered = message.to_lowercase();
                // SQLITE_BUSY (5): database is locked
                // SQLITE_LOCKED (6): database table is locked
                if lowered.contains("database is locked")
                    || lowered.contains("database table is locked")
                    || lowered.contains("sqlite_busy")
                    || lowered.contains("sqlite_locked")
                {
                    StoreError::Throttled(message)
                } else {
                    StoreError::Other(message)
                }
            }
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// A parsed entry attached to the feed it came from, trimmed and ready to be
/// committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEntry {
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub feed_title: String,
    pub feed_site_url: String,
}

/// One row of the dedup store.
///
/// Serialized field names follow the public `entries.json` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StoreRecord {
    /// Hex digest of the entry URL; primary key.
    #[serde(rename = "hash")]
    pub dedup_key: String,
    /// UTC calendar date of `published_at` (`YYYY-MM-DD`).
    #[serde(rename = "date")]
    pub partition_key: String,
    /// RFC 3339, second precision, UTC.
    #[serde(rename = "published")]
    pub published_at: String,
    /// Unix seconds after which the store may drop the record.
    #[serde(rename = "ttl")]
    pub expires_at: i64,
    pub title: String,
    pub url: String,
    #[serde(rename = "feed")]
    pub feed_title: String,
    #[serde(rename = "feed_site")]
    pub feed_site_url: String,
}

impl StoreRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }

    /// Parses `published_at` back into a timestamp; `None` if the stored
    /// string was written by something else and is unreadable.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.published_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_messages_map_to_throttled() {
        let err = StoreError::from_sqlx(sqlx::Error::Protocol("database is locked".into()));
        assert!(matches!(err, StoreError::Throttled(_)));
    }

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err = StoreError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_other_errors_map_to_other() {
        let err = StoreError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Other(_)));
    }

    #[test]
    fn test_listing_field_names() {
        let record = StoreRecord {
            dedup_key: "abc".into(),
            partition_key: "2024-01-01".into(),
            published_at: "2024-01-01T12:00:00Z".into(),
            expires_at: 1_704_715_200,
            title: "Post".into(),
            url: "https://example.com/post".into(),
            feed_title: "Example".into(),
            feed_site_url: "https://example.com".into(),
        };

        let json = serde_json::to_value(&record).unwrap();
        for key in ["hash", "date", "published", "ttl", "title", "url", "feed", "feed_site"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
