use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::types::{StoreError, StoreRecord};
use super::{DedupStore, ValidatorCache};
use crate::feed::Validators;

/// Process-local store for dry runs and tests. Same upsert and expiry
/// semantics as [`super::SqliteStore`], nothing persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoreRecord>>,
    validators: Mutex<HashMap<String, Validators>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, dedup_key: &str) -> Option<StoreRecord> {
        self.lock().ok()?.get(dedup_key).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoreRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Other("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn put(&self, record: &StoreRecord) -> Result<(), StoreError> {
        self.lock()?
            .insert(record.dedup_key.clone(), record.clone());
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<StoreRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .lock()?
            .values()
            .filter(|r| !r.is_expired_at(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ValidatorCache for MemoryStore {
    async fn load_validators(&self, fetch_url: &str) -> Result<Validators, StoreError> {
        let validators = self
            .validators
            .lock()
            .map_err(|_| StoreError::Other("memory store mutex poisoned".to_string()))?;
        Ok(validators.get(fetch_url).cloned().unwrap_or_default())
    }

    async fn save_validators(&self, fetch_url: &str, validators: &Validators) -> Result<(), StoreError> {
        let mut cache = self
            .validators
            .lock()
            .map_err(|_| StoreError::Other("memory store mutex poisoned".to_string()))?;
        if validators.is_empty() {
            cache.remove(fetch_url);
        } else {
            cache.insert(fetch_url.to_string(), validators.clone());
        }
        Ok(())
    }
}
