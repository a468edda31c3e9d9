//! The dedup store: where crawled entries land, keyed by a hash of their URL
//! and expiring on their own a week after publication.

mod key;
mod memory;
mod schema;
mod types;

use async_trait::async_trait;

use crate::feed::Validators;

pub use key::{dedup_key, expires_at, partition_key, RECORD_LIFETIME_SECS};
pub use memory::MemoryStore;
pub use schema::SqliteStore;
pub use types::{NormalizedEntry, StoreError, StoreRecord};

/// Client side of the dedup store.
///
/// `put` must be idempotent per `dedup_key` and safe to call concurrently for
/// distinct keys. `scan` returns every record that has not yet expired, in no
/// particular order.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn put(&self, record: &StoreRecord) -> Result<(), StoreError>;

    async fn scan(&self) -> Result<Vec<StoreRecord>, StoreError>;
}

/// HTTP cache validators remembered per feed fetch URL, so the next pass can
/// ask the server whether anything changed.
#[async_trait]
pub trait ValidatorCache: Send + Sync {
    /// Empty validators when the feed was never fetched in full.
    async fn load_validators(&self, fetch_url: &str) -> Result<Validators, StoreError>;

    async fn save_validators(&self, fetch_url: &str, validators: &Validators) -> Result<(), StoreError>;
}
