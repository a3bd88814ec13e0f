//! Remote store abstraction and an in-process implementation.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tillsync_codec::{Record, Value};

/// Request/response boundary to the backend's data-access API.
///
/// Every call may fail with a transport or validation error. The engine
/// treats all failures of a dispatched mutation alike: the causing queue
/// entry stays unsynced.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a record and returns it as stored.
    async fn insert(&self, collection: &str, record: &Record) -> SyncResult<Record>;

    /// Applies `fields` to the record identified by `key`.
    async fn update(&self, collection: &str, key: &Value, fields: &Record) -> SyncResult<Record>;

    /// Removes the record identified by `key`.
    async fn delete(&self, collection: &str, key: &Value) -> SyncResult<()>;

    /// Reads records matching `query`.
    async fn select(&self, collection: &str, query: &Query) -> SyncResult<Vec<Record>>;
}

/// Equality filter, ordering and limit for [`RemoteStore::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Field/value pairs that must all match.
    pub filters: Vec<(String, Value)>,
    /// Sort field and direction (`true` for ascending).
    pub order_by: Option<(String, bool)>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates an unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality filter.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Orders by a field.
    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some((field.into(), ascending));
        self
    }

    /// Caps the row count.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }
}

/// Orders values of the same kind; nulls and mismatched kinds sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Integer(x)), Some(Value::Integer(y))) => x.cmp(y),
        (Some(Value::Float(x)), Some(Value::Float(y))) => x.total_cmp(y),
        (Some(Value::Integer(x)), Some(Value::Float(y))) => (*x as f64).total_cmp(y),
        (Some(Value::Float(x)), Some(Value::Integer(y))) => x.total_cmp(&(*y as f64)),
        (Some(Value::Text(x)), Some(Value::Text(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Kind of call received by a [`MemoryRemote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `insert`
    Insert,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `select`
    Select,
}

/// One journaled call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    /// Call kind.
    pub kind: CallKind,
    /// Target collection.
    pub collection: String,
    /// Record key, when the call names one.
    pub key: Option<Value>,
    /// Inserted record or updated fields; empty otherwise.
    pub payload: Record,
    /// Whether the call succeeded.
    pub ok: bool,
}

#[derive(Debug, Default)]
struct MemoryRemoteInner {
    collections: BTreeMap<String, Vec<Record>>,
    journal: Vec<RemoteCall>,
    failing_keys: HashSet<(String, String)>,
    failing_collections: HashSet<String>,
    fail_next: usize,
    latency: Duration,
    unreachable: bool,
    next_id: i64,
}

impl MemoryRemoteInner {
    fn injected_failure(&mut self, collection: &str, key: Option<&Value>) -> Option<SyncError> {
        if self.unreachable {
            return Some(SyncError::transport_retryable("remote store unreachable"));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Some(SyncError::ServerError("injected failure".into()));
        }
        if self.failing_collections.contains(collection) {
            return Some(SyncError::ServerError(format!(
                "injected failure for collection `{collection}`"
            )));
        }
        if let Some(key) = key {
            if self
                .failing_keys
                .contains(&(collection.to_string(), key.to_string()))
            {
                return Some(SyncError::Rejected(format!(
                    "injected rejection for {collection}/{key}"
                )));
            }
        }
        None
    }

    fn position(&self, collection: &str, key_field: &str, key: &Value) -> Option<usize> {
        self.collections
            .get(collection)?
            .iter()
            .position(|r| r.get(key_field) == Some(key))
    }
}

/// In-process [`RemoteStore`] for tests and demos.
///
/// Collections are keyed by a configurable key field. Every call is
/// journaled, and failures and latency can be injected.
#[derive(Debug)]
pub struct MemoryRemote {
    key_field: String,
    inner: Mutex<MemoryRemoteInner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty remote keyed by `id`.
    pub fn new() -> Self {
        Self::with_key_field("id")
    }

    /// Creates an empty remote keyed by `key_field`.
    pub fn with_key_field(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            inner: Mutex::new(MemoryRemoteInner {
                next_id: 1,
                ..MemoryRemoteInner::default()
            }),
        }
    }

    /// Stores records directly, bypassing the journal.
    pub fn seed(&self, collection: &str, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(records);
    }

    /// All records of a collection in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.inner
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Looks up a record by key.
    pub fn get(&self, collection: &str, key: impl Into<Value>) -> Option<Record> {
        let key = key.into();
        let inner = self.inner.lock();
        let index = inner.position(collection, &self.key_field, &key)?;
        inner
            .collections
            .get(collection)
            .and_then(|rows| rows.get(index))
            .cloned()
    }

    /// Every call received so far, in arrival order.
    pub fn journal(&self) -> Vec<RemoteCall> {
        self.inner.lock().journal.clone()
    }

    /// Journaled calls of one kind.
    pub fn calls(&self, kind: CallKind) -> Vec<RemoteCall> {
        self.inner
            .lock()
            .journal
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    /// Forgets journaled calls.
    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    /// Rejects every call naming `key` in `collection`.
    pub fn fail_key(&self, collection: &str, key: impl Into<Value>) {
        let key = key.into().to_string();
        self.inner
            .lock()
            .failing_keys
            .insert((collection.to_string(), key));
    }

    /// Fails every call on `collection`.
    pub fn fail_collection(&self, collection: &str) {
        self.inner
            .lock()
            .failing_collections
            .insert(collection.to_string());
    }

    /// Fails the next `n` calls regardless of target.
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.failing_keys.clear();
        inner.failing_collections.clear();
        inner.fail_next = 0;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Makes every call fail with a transport error while `false`.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unreachable = !reachable;
    }

    async fn pause(&self) {
        let latency = self.inner.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn journaled<T>(
        &self,
        kind: CallKind,
        collection: &str,
        key: Option<&Value>,
        payload: Record,
        call: impl FnOnce(&mut MemoryRemoteInner) -> SyncResult<T>,
    ) -> SyncResult<T> {
        let mut inner = self.inner.lock();
        let result = match inner.injected_failure(collection, key) {
            Some(err) => Err(err),
            None => call(&mut *inner),
        };
        inner.journal.push(RemoteCall {
            kind,
            collection: collection.to_string(),
            key: key.cloned(),
            payload,
            ok: result.is_ok(),
        });
        result
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn insert(&self, collection: &str, record: &Record) -> SyncResult<Record> {
        self.pause().await;
        let key = record.get(&self.key_field).filter(|v| !v.is_null()).cloned();
        self.journaled(
            CallKind::Insert,
            collection,
            key.as_ref(),
            record.clone(),
            |inner| {
                let mut stored = record.clone();
                match &key {
                    Some(key) => {
                        if inner.position(collection, &self.key_field, key).is_some() {
                            return Err(SyncError::Rejected(format!(
                                "duplicate key {key} in {collection}"
                            )));
                        }
                    }
                    None => {
                        let id = inner.next_id;
                        inner.next_id += 1;
                        stored.insert(self.key_field.clone(), id);
                    }
                }
                inner
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .push(stored.clone());
                Ok(stored)
            },
        )
    }

    async fn update(&self, collection: &str, key: &Value, fields: &Record) -> SyncResult<Record> {
        self.pause().await;
        self.journaled(
            CallKind::Update,
            collection,
            Some(key),
            fields.clone(),
            |inner| {
                let index = inner
                    .position(collection, &self.key_field, key)
                    .ok_or_else(|| {
                        SyncError::Rejected(format!("no record {key} in {collection}"))
                    })?;
                let rows = inner
                    .collections
                    .get_mut(collection)
                    .ok_or_else(|| SyncError::Rejected(format!("no collection {collection}")))?;
                let row = &mut rows[index];
                for (field, value) in fields {
                    row.insert(field.clone(), value.clone());
                }
                Ok(row.clone())
            },
        )
    }

    async fn delete(&self, collection: &str, key: &Value) -> SyncResult<()> {
        self.pause().await;
        self.journaled(
            CallKind::Delete,
            collection,
            Some(key),
            Record::new(),
            |inner| {
                // Deleting an absent row succeeds so replays stay harmless
                if let Some(index) = inner.position(collection, &self.key_field, key) {
                    if let Some(rows) = inner.collections.get_mut(collection) {
                        rows.remove(index);
                    }
                }
                Ok(())
            },
        )
    }

    async fn select(&self, collection: &str, query: &Query) -> SyncResult<Vec<Record>> {
        self.pause().await;
        self.journaled(CallKind::Select, collection, None, Record::new(), |inner| {
            let mut rows: Vec<Record> = inner
                .collections
                .get(collection)
                .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
                .unwrap_or_default();

            if let Some((field, ascending)) = &query.order_by {
                rows.sort_by(|a, b| {
                    let ord = compare_values(a.get(field), b.get(field));
                    if *ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
            }
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_codec::record;

    #[tokio::test]
    async fn insert_assigns_missing_key() {
        let remote = MemoryRemote::new();
        let stored = remote
            .insert("orders", &record! { "entity_id" => "E1", "total" => 5000 })
            .await
            .unwrap();
        assert_eq!(stored.get("id"), Some(&Value::from(1)));
        assert_eq!(remote.records("orders").len(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let remote = MemoryRemote::new();
        let row = record! { "id" => "S1", "quantity" => 3 };
        remote.insert("stock", &row).await.unwrap();
        let err = remote.insert("stock", &row).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected(_)));
        assert!(!remote.journal()[1].ok);
    }

    #[tokio::test]
    async fn update_and_delete_by_key() {
        let remote = MemoryRemote::new();
        remote.seed("stock", [record! { "id" => "S1", "quantity" => 3 }]);

        remote
            .update("stock", &"S1".into(), &record! { "quantity" => 9 })
            .await
            .unwrap();
        assert_eq!(
            remote.get("stock", "S1").unwrap().get("quantity"),
            Some(&Value::from(9))
        );

        assert!(remote
            .update("stock", &"S2".into(), &record! { "quantity" => 1 })
            .await
            .is_err());

        remote.delete("stock", &"S1".into()).await.unwrap();
        remote.delete("stock", &"S1".into()).await.unwrap();
        assert!(remote.records("stock").is_empty());
    }

    #[tokio::test]
    async fn select_filters_orders_and_limits() {
        let remote = MemoryRemote::new();
        remote.seed(
            "products",
            [
                record! { "id" => 3, "business_id" => "B1" },
                record! { "id" => 1, "business_id" => "B1" },
                record! { "id" => 2, "business_id" => "B2" },
                record! { "id" => 4, "business_id" => "B1" },
            ],
        );

        let rows = remote
            .select(
                "products",
                &Query::new().eq("business_id", "B1").order_by("id", true).limit(2),
            )
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::from(1)), Some(Value::from(3))]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = MemoryRemote::new();
        remote.fail_key("stock", "S1");
        assert!(matches!(
            remote.delete("stock", &"S1".into()).await,
            Err(SyncError::Rejected(_))
        ));
        assert!(remote.delete("stock", &"S2".into()).await.is_ok());

        remote.fail_next(1);
        assert!(remote.delete("stock", &"S2".into()).await.is_err());
        assert!(remote.delete("stock", &"S2".into()).await.is_ok());

        remote.set_reachable(false);
        let err = remote.select("stock", &Query::new()).await.unwrap_err();
        assert!(err.is_retryable());

        remote.set_reachable(true);
        remote.clear_failures();
        assert!(remote.delete("stock", &"S1".into()).await.is_ok());
        assert_eq!(remote.calls(CallKind::Delete).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_calls() {
        let remote = MemoryRemote::new();
        remote.set_latency(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        remote.select("stock", &Query::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
