//! In-process store backend
//!
//! Records live in a `DashMap`; an update runs its read-modify-write while
//! holding the entry's shard lock, so updates to one key are serialized and
//! updates to different keys proceed in parallel. Append-only tables keep a
//! per-table time index for range queries.
//!
//! Fault injection (`set_unavailable`, `set_appends_unavailable`, `set_latency`)
//! lets tests exercise the fail-closed and timeout paths of the services above.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{Store, Table, UpdateFn};
use crate::error::{PersistenceError, Result};

/// In-memory [`Store`] implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<(Table, String), Value>,
    timeline: DashMap<Table, BTreeMap<(DateTime<Utc>, u64), String>>,
    sequence: AtomicU64,
    unavailable: AtomicBool,
    appends_unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only appends fail, leaving reads and updates working
    pub fn set_appends_unavailable(&self, unavailable: bool) {
        self.appends_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of records in a table
    pub fn len(&self, table: Table) -> usize {
        self.records.iter().filter(|r| r.key().0 == table).count()
    }

    /// Whether a table holds no records
    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }

    async fn gate(&self, operation: &str, table: Option<Table>) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            let operation = match table {
                Some(table) => format!("{operation}:{table}"),
                None => operation.to_string(),
            };
            return Err(PersistenceError::unavailable(operation, "memory store marked unavailable").into());
        }
        Ok(())
    }

    /// Replace a stored record without any table checks
    #[cfg(test)]
    pub(crate) fn overwrite_raw(&self, table: Table, key: &str, value: Value) {
        self.records.insert((table, key.to_string()), value);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.gate("ping", None).await
    }

    async fn append(&self, table: Table, key: &str, at: DateTime<Utc>, value: Value) -> Result<()> {
        self.gate("append", Some(table)).await?;
        if self.appends_unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::unavailable(format!("append:{table}"), "memory store appends marked unavailable").into());
        }
        if !table.is_append_only() {
            return Err(PersistenceError::append_only(
                format!("append:{table}"),
                format!("{table} is not an append-only table"),
            )
            .into());
        }

        match self.records.entry((table, key.to_string())) {
            Entry::Occupied(_) => Err(PersistenceError::conflict(
                format!("append:{table}"),
                format!("record {key} already exists"),
            )
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(value);
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
                self.timeline
                    .entry(table)
                    .or_default()
                    .insert((at, seq), key.to_string());
                Ok(())
            }
        }
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>> {
        self.gate("get", Some(table)).await?;
        Ok(self
            .records
            .get(&(table, key.to_string()))
            .map(|record| record.value().clone()))
    }

    async fn update(&self, table: Table, key: &str, apply: &UpdateFn<'_>) -> Result<Value> {
        self.gate("update", Some(table)).await?;
        if table.is_append_only() {
            return Err(PersistenceError::append_only(
                format!("update:{table}"),
                format!("records in {table} are immutable"),
            )
            .into());
        }

        match self.records.entry((table, key.to_string())) {
            Entry::Occupied(mut slot) => {
                let next = apply(Some(slot.get().clone()))?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(slot) => {
                let next = apply(None)?;
                slot.insert(next.clone());
                Ok(next)
            }
        }
    }

    async fn range(
        &self,
        table: Table,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        self.gate("range", Some(table)).await?;
        let keys: Vec<String> = match self.timeline.get(&table) {
            Some(index) => index
                .iter()
                .filter(|((at, _), _)| from.is_none_or(|from| *at >= from))
                .filter(|((at, _), _)| to.is_none_or(|to| *at <= to))
                .map(|(_, key)| key.clone())
                .collect(),
            None => Vec::new(),
        };

        Ok(keys
            .into_iter()
            .filter_map(|key| self.records.get(&(table, key)).map(|r| r.value().clone()))
            .collect())
    }

    async fn scan(&self, table: Table) -> Result<Vec<(String, Value)>> {
        self.gate("scan", Some(table)).await?;
        let mut rows: Vec<(String, Value)> = self
            .records
            .iter()
            .filter(|r| r.key().0 == table)
            .map(|r| (r.key().1.clone(), r.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, PersistenceErrorKind};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::Arc;

    fn kind_of(err: Error) -> PersistenceErrorKind {
        match err {
            Error::Persistence(e) => e.kind,
            other => panic!("expected persistence error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_rejects_duplicates_and_upsert_tables() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .append(Table::AuditEvents, "evt_1", now, json!({"a": 1}))
            .await
            .unwrap();
        let dup = store
            .append(Table::AuditEvents, "evt_1", now, json!({"a": 2}))
            .await
            .unwrap_err();
        assert_eq!(kind_of(dup), PersistenceErrorKind::Conflict);

        let wrong = store
            .append(Table::Credentials, "github_pat", now, json!({}))
            .await
            .unwrap_err();
        assert_eq!(kind_of(wrong), PersistenceErrorKind::AppendOnly);

        let stored = store.get(Table::AuditEvents, "evt_1").await.unwrap();
        assert_eq!(stored, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_update_rejects_append_only_tables() {
        let store = MemoryStore::new();
        let apply = |_: Option<Value>| -> Result<Value> { Ok(json!(1)) };
        let err = store
            .update(Table::AuditEvents, "evt_1", &apply)
            .await
            .unwrap_err();
        assert_eq!(kind_of(err), PersistenceErrorKind::AppendOnly);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_record_untouched() {
        let store = MemoryStore::new();
        let set = |_: Option<Value>| -> Result<Value> { Ok(json!({"count": 3})) };
        store.update(Table::RateLimits, "a.com", &set).await.unwrap();

        let fail = |_: Option<Value>| -> Result<Value> { Err(Error::Internal("nope".into())) };
        assert!(store.update(Table::RateLimits, "a.com", &fail).await.is_err());

        let stored = store.get(Table::RateLimits, "a.com").await.unwrap();
        assert_eq!(stored, Some(json!({"count": 3})));
    }

    #[tokio::test]
    async fn test_range_orders_by_time_and_filters() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store
            .append(Table::AuditEvents, "late", t0 + ChronoDuration::seconds(20), json!("late"))
            .await
            .unwrap();
        store
            .append(Table::AuditEvents, "early", t0, json!("early"))
            .await
            .unwrap();
        store
            .append(Table::AuditEvents, "mid", t0 + ChronoDuration::seconds(10), json!("mid"))
            .await
            .unwrap();

        let all = store.range(Table::AuditEvents, None, None).await.unwrap();
        assert_eq!(all, vec![json!("early"), json!("mid"), json!("late")]);

        let window = store
            .range(
                Table::AuditEvents,
                Some(t0 + ChronoDuration::seconds(5)),
                Some(t0 + ChronoDuration::seconds(10)),
            )
            .await
            .unwrap();
        assert_eq!(window, vec![json!("mid")]);

        assert!(store
            .range(Table::MetricSamples, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert_eq!(kind_of(store.ping().await.unwrap_err()), PersistenceErrorKind::Unavailable);
        assert_eq!(
            kind_of(store.get(Table::Credentials, "x").await.unwrap_err()),
            PersistenceErrorKind::Unavailable
        );

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_serialized_per_key() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let inc = |current: Option<Value>| -> Result<Value> {
                        Ok(json!(current.and_then(|v| v.as_u64()).unwrap_or(0) + 1))
                    };
                    store.update(Table::RateLimits, "shared", &inc).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let total = store.get(Table::RateLimits, "shared").await.unwrap();
        assert_eq!(total, Some(json!(400)));
    }
}
