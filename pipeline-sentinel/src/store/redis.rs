//! Redis store backend
//!
//! Layout, for a configured prefix `p`:
//!
//! - `p:{table}:{key}` holds the JSON record
//! - `p:timeline:{table}` is a sorted set of keys scored by write time in
//!   microseconds, maintained for append-only tables
//!
//! Appends use `SET NX` so an existing record is never overwritten. Updates
//! are optimistic `WATCH` / `MULTI` / `EXEC` transactions retried up to
//! `max_update_retries` times before surfacing a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config as DeadpoolConfig, Connection, Pool, Runtime};
use serde_json::Value;
use std::time::Duration;

use super::{Store, Table, UpdateFn};
use crate::config::RedisConfig;
use crate::error::{Error, PersistenceError, PersistenceErrorKind, Result};

/// Redis-backed [`Store`] shared across processes
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    prefix: String,
    max_update_retries: u32,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("max_update_retries", &self.max_update_retries)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis, retrying with exponential backoff
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let pool = create_pool_with_retries(config, config.max_retries).await?;
        Ok(Self {
            pool,
            prefix: config.key_prefix.clone(),
            max_update_retries: config.max_update_retries,
        })
    }

    fn record_key(&self, table: Table, key: &str) -> String {
        record_key(&self.prefix, table, key)
    }

    fn timeline_key(&self, table: Table) -> String {
        timeline_key(&self.prefix, table)
    }

    async fn conn(&self, operation: &str) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| PersistenceError::unavailable(operation, e.to_string()).into())
    }

    async fn fetch_many(&self, conn: &mut Connection, operation: &str, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        redis::cmd("MGET")
            .arg(keys)
            .query_async(conn)
            .await
            .map_err(|e| redis_error(operation, e))
    }
}

fn record_key(prefix: &str, table: Table, key: &str) -> String {
    format!("{prefix}:{table}:{key}")
}

fn timeline_key(prefix: &str, table: Table) -> String {
    format!("{prefix}:timeline:{table}")
}

/// Record and time-index entry in one MULTI/EXEC, so neither lands alone
fn append_pipeline(record_key: &str, encoded: String, timeline_key: &str, key: &str, at: DateTime<Utc>) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .set(record_key, encoded)
        .ignore()
        .zadd(timeline_key, key, score(at));
    pipe
}

fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64
}

fn redis_error(operation: &str, err: redis::RedisError) -> Error {
    let kind = if err.is_timeout() {
        PersistenceErrorKind::Timeout
    } else {
        PersistenceErrorKind::Unavailable
    };
    PersistenceError::new(operation, kind, err.to_string()).into()
}

fn decode(operation: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| PersistenceError::serialization(operation, e.to_string()).into())
}

fn encode(operation: &str, value: &Value) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| PersistenceError::serialization(operation, e.to_string()).into())
}

#[async_trait]
impl Store for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn("ping").await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("ping", e))?;
        Ok(())
    }

    async fn append(&self, table: Table, key: &str, at: DateTime<Utc>, value: Value) -> Result<()> {
        let operation = format!("append:{table}");
        if !table.is_append_only() {
            return Err(PersistenceError::append_only(
                operation,
                format!("{table} is not an append-only table"),
            )
            .into());
        }

        let encoded = encode(&operation, &value)?;
        let record_key = self.record_key(table, key);
        let mut conn = self.conn(&operation).await?;

        let _: () = redis::cmd("WATCH")
            .arg(&record_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error(&operation, e))?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(&record_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error(&operation, e))?;
        if exists {
            let _: std::result::Result<(), _> = redis::cmd("UNWATCH").query_async(&mut conn).await;
            return Err(PersistenceError::conflict(operation, format!("record {key} already exists")).into());
        }

        let committed: Option<(i64,)> = append_pipeline(&record_key, encoded, &self.timeline_key(table), key, at)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error(&operation, e))?;
        if committed.is_none() {
            return Err(PersistenceError::conflict(operation, format!("record {key} was written concurrently")).into());
        }
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>> {
        let operation = format!("get:{table}");
        let mut conn = self.conn(&operation).await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.record_key(table, key))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error(&operation, e))?;
        raw.map(|raw| decode(&operation, &raw)).transpose()
    }

    async fn update(&self, table: Table, key: &str, apply: &UpdateFn<'_>) -> Result<Value> {
        let operation = format!("update:{table}");
        if table.is_append_only() {
            return Err(PersistenceError::append_only(
                operation,
                format!("records in {table} are immutable"),
            )
            .into());
        }

        let record_key = self.record_key(table, key);
        let mut conn = self.conn(&operation).await?;

        for attempt in 0..=self.max_update_retries {
            let _: () = redis::cmd("WATCH")
                .arg(&record_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error(&operation, e))?;

            let raw: Option<String> = redis::cmd("GET")
                .arg(&record_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error(&operation, e))?;

            let next = raw
                .map(|raw| decode(&operation, &raw))
                .transpose()
                .and_then(apply)
                .and_then(|next| Ok((encode(&operation, &next)?, next)));
            let (encoded, next) = match next {
                Ok(pair) => pair,
                Err(e) => {
                    let _: std::result::Result<(), _> =
                        redis::cmd("UNWATCH").query_async(&mut conn).await;
                    return Err(e);
                }
            };

            let committed: Option<(String,)> = redis::pipe()
                .atomic()
                .set(&record_key, encoded)
                .ignore()
                .get(&record_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error(&operation, e))?;

            if committed.is_some() {
                return Ok(next);
            }

            tracing::debug!(
                table = %table,
                key = %key,
                attempt = attempt + 1,
                "Optimistic update raced, retrying"
            );
        }

        Err(PersistenceError::conflict(
            operation,
            format!(
                "gave up on {key} after {} attempts",
                self.max_update_retries + 1
            ),
        )
        .into())
    }

    async fn range(
        &self,
        table: Table,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        let operation = format!("range:{table}");
        let mut conn = self.conn(&operation).await?;

        let min = from.map_or_else(|| "-inf".to_string(), |from| score(from).to_string());
        let max = to.map_or_else(|| "+inf".to_string(), |to| score(to).to_string());
        let keys: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.timeline_key(table))
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error(&operation, e))?;

        let record_keys: Vec<String> = keys.iter().map(|k| self.record_key(table, k)).collect();
        self.fetch_many(&mut conn, &operation, &record_keys)
            .await?
            .into_iter()
            .flatten()
            .map(|raw| decode(&operation, &raw))
            .collect()
    }

    async fn scan(&self, table: Table) -> Result<Vec<(String, Value)>> {
        let operation = format!("scan:{table}");
        let mut conn = self.conn(&operation).await?;
        let table_prefix = self.record_key(table, "");
        let pattern = format!("{table_prefix}*");

        let mut cursor: u64 = 0;
        let mut record_keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error(&operation, e))?;
            record_keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        record_keys.sort();
        record_keys.dedup();

        let values = self.fetch_many(&mut conn, &operation, &record_keys).await?;
        record_keys
            .into_iter()
            .zip(values)
            .filter_map(|(full_key, raw)| raw.map(|raw| (full_key, raw)))
            .map(|(full_key, raw)| {
                let key = full_key
                    .strip_prefix(&table_prefix)
                    .unwrap_or(&full_key)
                    .to_string();
                Ok((key, decode(&operation, &raw)?))
            })
            .collect()
    }
}

/// Create a Redis connection pool with configurable retries
///
/// Uses exponential backoff strategy for retries
async fn create_pool_with_retries(config: &RedisConfig, max_retries: u32) -> Result<Pool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                tracing::info!(
                    attempts = attempt + 1,
                    max_connections = config.max_connections,
                    "Redis store pool ready"
                );
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > max_retries {
                    tracing::error!(
                        attempts = max_retries + 1,
                        error = %e,
                        "Failed to connect to Redis store"
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    attempt,
                    error = %e,
                    retry_in = ?delay,
                    "Redis store connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Attempt to create a Redis pool (single try)
async fn try_create_pool(config: &RedisConfig) -> Result<Pool> {
    let pool = DeadpoolConfig::from_url(&config.url)
        .builder()
        .map_err(|e| PersistenceError::unavailable("connect", format!("failed to build pool: {e}")))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| PersistenceError::unavailable("connect", format!("failed to create pool: {e}")))?;

    // Test the connection
    let conn = pool
        .get()
        .await
        .map_err(|e| PersistenceError::unavailable("connect", format!("failed to get connection: {e}")))?;
    drop(conn);

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            record_key("sentinel", Table::RateLimits, "example.com"),
            "sentinel:rate_limits:example.com"
        );
        assert_eq!(
            timeline_key("sentinel", Table::AuditEvents),
            "sentinel:timeline:audit_events"
        );
    }

    #[test]
    fn test_score_is_microsecond_precise() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T12:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(score(at), 1_740_830_400_123_456.0);
    }

    #[test]
    fn test_append_writes_record_and_index_in_one_transaction() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let packed = append_pipeline(
            "sentinel:audit_events:evt_1",
            "{}".to_string(),
            "sentinel:timeline:audit_events",
            "evt_1",
            at,
        )
        .get_packed_pipeline();
        let packed = String::from_utf8(packed).unwrap();

        let order: Vec<usize> = ["MULTI", "SET", "ZADD", "EXEC"]
            .iter()
            .map(|cmd| packed.find(&format!("\r\n{cmd}\r\n")).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{packed:?}");
        assert!(packed.contains("sentinel:timeline:audit_events"));
    }
}
