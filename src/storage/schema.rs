use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{StoreError, StoreRecord};
use super::{DedupStore, ValidatorCache};
use crate::feed::Validators;

// ============================================================================
// SqliteStore
// ============================================================================

/// Dedup store backed by a SQLite file (or `:memory:`).
///
/// `expires_at` is honoured by the store itself: expired rows are never
/// returned by [`DedupStore::scan`] and are swept out by
/// [`SqliteStore::purge_expired`], which runs every time the store is opened.
/// Callers never delete.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the store and run migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for a competing writer before
        // SQLITE_BUSY surfaces as StoreError::Throttled.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let store = Self { pool };
        store.migrate().await.map_err(StoreError::from_sqlx)?;

        let purged = store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::debug!(purged = purged, "Expired entries removed from store");
        }

        Ok(store)
    }

    /// Create the schema. Every statement is `IF NOT EXISTS`, so re-running
    /// against an existing file is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                dedup_key TEXT PRIMARY KEY NOT NULL,
                partition_key TEXT NOT NULL,
                published_at TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                feed_title TEXT NOT NULL,
                feed_site_url TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition_key)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_expires ON entries(expires_at)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_validators (
                fetch_url TEXT PRIMARY KEY NOT NULL,
                etag TEXT,
                last_modified TEXT,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The store's native expiry: drops every row whose watermark has passed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM entries WHERE expires_at <= ?")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    /// Number of physical rows, expired or not.
    pub async fn row_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(count)
    }

    /// Unexpired records of one day, newest first.
    pub async fn scan_partition(&self, partition_key: &str) -> Result<Vec<StoreRecord>, StoreError> {
        sqlx::query_as::<_, StoreRecord>(
            r#"
            SELECT dedup_key, partition_key, published_at, expires_at,
                   title, url, feed_title, feed_site_url
            FROM entries
            WHERE partition_key = ? AND expires_at > ?
            ORDER BY published_at DESC
        "#,
        )
        .bind(partition_key)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}

#[async_trait]
impl DedupStore for SqliteStore {
    /// Upsert by `dedup_key`; the last write for a key wins.
    async fn put(&self, record: &StoreRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO entries (dedup_key, partition_key, published_at, expires_at,
                                 title, url, feed_title, feed_site_url)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dedup_key) DO UPDATE SET
                partition_key = excluded.partition_key,
                published_at = excluded.published_at,
                expires_at = excluded.expires_at,
                title = excluded.title,
                url = excluded.url,
                feed_title = excluded.feed_title,
                feed_site_url = excluded.feed_site_url
        "#,
        )
        .bind(&record.dedup_key)
        .bind(&record.partition_key)
        .bind(&record.published_at)
        .bind(record.expires_at)
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.feed_title)
        .bind(&record.feed_site_url)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }

    async fn scan(&self) -> Result<Vec<StoreRecord>, StoreError> {
        sqlx::query_as::<_, StoreRecord>(
            r#"
            SELECT dedup_key, partition_key, published_at, expires_at,
                   title, url, feed_title, feed_site_url
            FROM entries
            WHERE expires_at > ?
        "#,
        )
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}

#[async_trait]
impl ValidatorCache for SqliteStore {
    async fn load_validators(&self, fetch_url: &str) -> Result<Validators, StoreError> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT etag, last_modified FROM feed_validators WHERE fetch_url = ?")
                .bind(fetch_url)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;

        Ok(row
            .map(|(etag, last_modified)| Validators {
                etag,
                last_modified,
            })
            .unwrap_or_default())
    }

    /// Empty validators delete the row, so the next fetch is unconditional.
    async fn save_validators(&self, fetch_url: &str, validators: &Validators) -> Result<(), StoreError> {
        if validators.is_empty() {
            sqlx::query("DELETE FROM feed_validators WHERE fetch_url = ?")
                .bind(fetch_url)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO feed_validators (fetch_url, etag, last_modified, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fetch_url) DO UPDATE SET
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(fetch_url)
        .bind(&validators.etag)
        .bind(&validators.last_modified)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NormalizedEntry;
    use chrono::TimeDelta;

    async fn test_store() -> SqliteStore {
        SqliteStore::open(":memory:").await.unwrap()
    }

    fn record(url: &str, title: &str, age: TimeDelta) -> StoreRecord {
        StoreRecord::from(&NormalizedEntry {
            published_at: Utc::now() - age,
            title: title.to_string(),
            url: url.to_string(),
            feed_title: "Test Feed".to_string(),
            feed_site_url: "https://example.com".to_string(),
        })
    }

    #[tokio::test]
    async fn test_put_then_scan() {
        let store = test_store().await;
        let rec = record("https://example.com/a", "A", TimeDelta::hours(1));

        store.put(&rec).await.unwrap();

        let records = store.scan().await.unwrap();
        assert_eq!(records, vec![rec]);
    }

    #[tokio::test]
    async fn test_put_same_key_overwrites() {
        let store = test_store().await;
        let first = record("https://example.com/a", "Original", TimeDelta::hours(2));
        let second = record("https://example.com/a", "Updated", TimeDelta::hours(2));
        assert_eq!(first.dedup_key, second.dedup_key);

        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        let records = store.scan().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Updated");
        assert_eq!(store.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible() {
        let store = test_store().await;
        store
            .put(&record("https://example.com/old", "Old", TimeDelta::days(9)))
            .await
            .unwrap();
        store
            .put(&record("https://example.com/new", "New", TimeDelta::days(1)))
            .await
            .unwrap();

        let records = store.scan().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "New");
        // Still physically present until the sweep runs
        assert_eq!(store.row_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_expired() {
        let store = test_store().await;
        store
            .put(&record("https://example.com/old", "Old", TimeDelta::days(8)))
            .await
            .unwrap();
        store
            .put(&record("https://example.com/new", "New", TimeDelta::days(6)))
            .await
            .unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_partition() {
        let store = test_store().await;
        let a = record("https://example.com/a", "A", TimeDelta::hours(1));
        store.put(&a).await.unwrap();
        store
            .put(&record("https://example.com/b", "B", TimeDelta::days(3)))
            .await
            .unwrap();

        let day = store.scan_partition(&a.partition_key).await.unwrap();
        assert!(day.iter().any(|r| r.title == "A"));
        assert!(day.iter().all(|r| r.partition_key == a.partition_key));
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_records() {
        let dir = std::env::temp_dir().join(format!(
            "engblogs_store_test_reopen_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("entries.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path_str).await.unwrap();
            store
                .put(&record("https://example.com/a", "A", TimeDelta::hours(1)))
                .await
                .unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::open(path_str).await.unwrap();
        assert_eq!(store.scan().await.unwrap().len(), 1);

        store.pool.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_validators_round_trip_per_feed() {
        let store = test_store().await;
        let url = "https://example.com/feed.xml";
        assert_eq!(store.load_validators(url).await.unwrap(), Validators::default());

        let first = Validators {
            etag: Some("\"abc\"".to_string()),
            last_modified: None,
        };
        store.save_validators(url, &first).await.unwrap();
        assert_eq!(store.load_validators(url).await.unwrap(), first);
        assert_eq!(
            store.load_validators("https://other.example.com/feed").await.unwrap(),
            Validators::default()
        );

        let second = Validators {
            etag: None,
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
        };
        store.save_validators(url, &second).await.unwrap();
        assert_eq!(store.load_validators(url).await.unwrap(), second);

        store.save_validators(url, &Validators::default()).await.unwrap();
        assert_eq!(store.load_validators(url).await.unwrap(), Validators::default());
    }
}
