//! Read-side cache of remote reference data.

use crate::error::CoreResult;
use crate::store::LocalStore;
use crate::types::CacheRecord;
use std::sync::Arc;
use tillsync_codec::{Record, Value};

/// Handle to the cache partition of the local store.
///
/// Records are only ever written from remote fetches, one collection batch
/// at a time; readers never see a half-applied batch.
#[derive(Debug, Clone)]
pub struct CacheStore {
    store: Arc<LocalStore>,
}

impl CacheStore {
    /// Creates a cache handle over a shared store.
    #[must_use]
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Upserts a fetched batch into `collection` atomically.
    pub fn upsert_all(&self, collection: &str, records: Vec<Record>) -> CoreResult<usize> {
        self.store.cache_put_all(collection, records)
    }

    /// Reads one record by key.
    #[must_use]
    pub fn get(&self, collection: &str, key: &Value) -> Option<CacheRecord> {
        self.store.cache_get(collection, &key.to_string())
    }

    /// All records of a collection, ordered by key.
    #[must_use]
    pub fn list(&self, collection: &str) -> Vec<CacheRecord> {
        self.store.cache_list(collection)
    }

    /// Records of a collection whose `scope_field` equals `scope`.
    #[must_use]
    pub fn list_scope(&self, collection: &str, scope_field: &str, scope: &str) -> Vec<CacheRecord> {
        self.list(collection)
            .into_iter()
            .filter(|r| r.fields.get(scope_field).and_then(Value::as_str) == Some(scope))
            .collect()
    }

    /// Number of records in a collection.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.list(collection).len()
    }

    /// Names of collections holding cached data.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.store.cache_collections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_codec::record;

    #[test]
    fn upsert_and_read() {
        let cache = CacheStore::new(Arc::new(LocalStore::open_in_memory().unwrap()));
        cache
            .upsert_all(
                "products",
                vec![
                    record! { "id" => 1, "name" => "Tea", "business_id" => "B1" },
                    record! { "id" => 2, "name" => "Milk", "business_id" => "B2" },
                ],
            )
            .unwrap();

        assert_eq!(cache.len("products"), 2);
        assert_eq!(
            cache.get("products", &Value::from(1)).unwrap().fields.get("name"),
            Some(&Value::from("Tea"))
        );
        assert_eq!(cache.list_scope("products", "business_id", "B2").len(), 1);
        assert!(cache.get("stock", &Value::from(1)).is_none());
        assert_eq!(cache.collections(), vec!["products".to_string()]);
    }
}
