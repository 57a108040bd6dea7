//! Durable store shared by every sentinel service
//!
//! The [`Store`] trait is the only persistence seam. Records are JSON values
//! addressed by `(table, key)`. Two table families exist:
//!
//! - **Append-only** (`audit_events`, `metric_samples`): written once with
//!   [`Store::append`], listed by time with [`Store::range`]. Backends reject
//!   [`Store::update`] on these tables.
//! - **Upsert** (`credentials`, `rate_limits`): mutated only through
//!   [`Store::update`], which is an atomic read-modify-write per key.
//!
//! # Available Backends
//!
//! - [`MemoryStore`]: in-process, used for tests and single-process runs
//! - [`RedisStore`] (`redis` feature): shared across processes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PersistenceError, Result};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Logical tables of the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Tamper-evident audit trail (append-only)
    AuditEvents,
    /// Credential rotation records keyed by credential type
    Credentials,
    /// Rate limit state keyed by domain
    RateLimits,
    /// Flushed metric samples (append-only)
    MetricSamples,
}

impl Table {
    /// Every table, in a stable order
    pub const ALL: [Table; 4] = [
        Table::AuditEvents,
        Table::Credentials,
        Table::RateLimits,
        Table::MetricSamples,
    ];

    /// Storage name of the table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuditEvents => "audit_events",
            Self::Credentials => "credentials",
            Self::RateLimits => "rate_limits",
            Self::MetricSamples => "metric_samples",
        }
    }

    /// Whether records in this table are immutable once written
    pub fn is_append_only(&self) -> bool {
        matches!(self, Self::AuditEvents | Self::MetricSamples)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-modify-write function applied by [`Store::update`]
///
/// Receives the current record (or `None` when the key is absent) and returns
/// the record to persist. Returning an error aborts the update and leaves the
/// stored record untouched. Backends with optimistic concurrency may call the
/// function more than once, so it must not have side effects beyond the value
/// it returns.
pub type UpdateFn<'a> = dyn Fn(Option<Value>) -> Result<Value> + Send + Sync + 'a;

/// Persistence backend for all sentinel state
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug + 'static {
    /// Short backend name for logs and health reports
    fn backend_name(&self) -> &'static str;

    /// Round-trip to the backend
    async fn ping(&self) -> Result<()>;

    /// Write a new record to an append-only table
    ///
    /// Fails with a conflict if `key` already exists; records are never
    /// overwritten.
    async fn append(&self, table: Table, key: &str, at: DateTime<Utc>, value: Value) -> Result<()>;

    /// Fetch a record by key
    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>>;

    /// Atomically read, transform and write back one upsert record
    ///
    /// Returns the value that was persisted.
    async fn update(&self, table: Table, key: &str, apply: &UpdateFn<'_>) -> Result<Value>;

    /// List append-only records with `from <= at <= to`, oldest first
    async fn range(
        &self,
        table: Table,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>>;

    /// List every `(key, record)` of a table
    async fn scan(&self, table: Table) -> Result<Vec<(String, Value)>>;
}

/// Shared, timeout-bounded handle to the configured store
///
/// Every call is wrapped in `tokio::time::timeout`; an elapsed call surfaces
/// as a [`PersistenceError`] of kind `Timeout`. Typed helpers (de)serialize
/// records with `serde_json`.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn Store>,
    timeout: Duration,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("backend", &self.inner.backend_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StoreHandle {
    /// Wrap a store with a per-call timeout
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self {
            inner: store,
            timeout,
        }
    }

    /// Backend name of the wrapped store
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, operation: String, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    operation = %operation,
                    backend = self.inner.backend_name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(PersistenceError::timeout(
                    operation,
                    format!("exceeded {}ms", self.timeout.as_millis()),
                )
                .into())
            }
        }
    }

    /// Bounded [`Store::ping`]
    pub async fn ping(&self) -> Result<()> {
        self.bounded("ping".to_string(), self.inner.ping()).await
    }

    /// Bounded [`Store::append`]
    pub async fn append(&self, table: Table, key: &str, at: DateTime<Utc>, value: Value) -> Result<()> {
        self.bounded(
            format!("append:{table}"),
            self.inner.append(table, key, at, value),
        )
        .await
    }

    /// Bounded [`Store::get`]
    pub async fn get(&self, table: Table, key: &str) -> Result<Option<Value>> {
        self.bounded(format!("get:{table}"), self.inner.get(table, key))
            .await
    }

    /// Bounded [`Store::update`]
    pub async fn update(&self, table: Table, key: &str, apply: &UpdateFn<'_>) -> Result<Value> {
        self.bounded(
            format!("update:{table}"),
            self.inner.update(table, key, apply),
        )
        .await
    }

    /// Bounded [`Store::range`]
    pub async fn range(
        &self,
        table: Table,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        self.bounded(format!("range:{table}"), self.inner.range(table, from, to))
            .await
    }

    /// Bounded [`Store::scan`]
    pub async fn scan(&self, table: Table) -> Result<Vec<(String, Value)>> {
        self.bounded(format!("scan:{table}"), self.inner.scan(table))
            .await
    }

    /// Serialize and append a record
    pub async fn append_record<T: Serialize>(
        &self,
        table: Table,
        key: &str,
        at: DateTime<Utc>,
        record: &T,
    ) -> Result<()> {
        let value = to_value(table, record)?;
        self.append(table, key, at, value).await
    }

    /// Fetch and deserialize a record
    pub async fn get_record<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        self.get(table, key)
            .await?
            .map(|value| from_value(table, value))
            .transpose()
    }

    /// Typed atomic read-modify-write
    pub async fn update_record<T, F>(&self, table: Table, key: &str, apply: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Option<T>) -> Result<T> + Send + Sync,
    {
        let raw = move |current: Option<Value>| -> Result<Value> {
            let current = current.map(|value| from_value(table, value)).transpose()?;
            to_value(table, &apply(current)?)
        };
        let stored = self.update(table, key, &raw).await?;
        from_value(table, stored)
    }

    /// Range query deserialized into records
    pub async fn range_records<T: DeserializeOwned>(
        &self,
        table: Table,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<T>> {
        self.range(table, from, to)
            .await?
            .into_iter()
            .map(|value| from_value(table, value))
            .collect()
    }

    /// Full scan deserialized into records
    pub async fn scan_records<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<(String, T)>> {
        self.scan(table)
            .await?
            .into_iter()
            .map(|(key, value)| Ok((key, from_value(table, value)?)))
            .collect()
    }
}

fn to_value<T: Serialize>(table: Table, record: &T) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| {
        PersistenceError::serialization(format!("encode:{table}"), e.to_string()).into()
    })
}

fn from_value<T: DeserializeOwned>(table: Table, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        PersistenceError::serialization(format!("decode:{table}"), e.to_string()).into()
    })
}

/// Health sample of the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreLatency {
    /// Backend name
    pub backend: String,
    /// Round-trip latency of a ping
    pub latency_ms: u64,
}

impl StoreHandle {
    /// Ping the store and measure latency
    pub async fn sample_latency(&self) -> Result<StoreLatency> {
        let started = std::time::Instant::now();
        self.ping().await?;
        Ok(StoreLatency {
            backend: self.backend_name().to_string(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
