//! # pipeline-sentinel
//!
//! Operational guard rails for multi-target data-collection pipelines. Many
//! workflow workers share one durable store and use the sentinel to keep
//! themselves honest toward the sites they scrape and the credentials they hold.
//!
//! ## Features
//!
//! - **Audit log**: append-only, checksummed events per workflow with tamper
//!   detection, failure escalation and JSONL export
//! - **Rate limiting**: per-domain minute/hour/day windows plus a token bucket
//!   with burst cooldowns, enforced atomically through the store
//! - **Credential tracking**: expiry reporting, expired-credential gating and
//!   cross-process serialised rotation
//! - **Metrics and alerts**: counters, gauges and histograms with threshold
//!   rules, cooldowns and webhook delivery
//! - **Health checks**: one aggregated report across every component
//! - **Pluggable store**: in-memory for tests, Redis (feature `redis`) for
//!   shared deployments
//!
//! ## Example
//!
//! ```rust,no_run
//! use pipeline_sentinel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     let sentinel = Sentinel::builder().config(config).build().await?;
//!
//!     let admission = sentinel.rate_limiter().acquire("https://api.example.com/v1", "wf-42").await?;
//!     if admission.allowed {
//!         let audit = sentinel.audit().for_workflow("wf-42");
//!         audit
//!             .record(
//!                 AuditEventType::ActionSuccess,
//!                 "fetch",
//!                 "api.example.com",
//!                 AuditStatus::Success,
//!                 serde_json::json!({ "rows": 120 }),
//!             )
//!             .await?;
//!     }
//!
//!     let report = sentinel.health_check().await;
//!     tracing::info!(status = ?report.status, "health");
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod sentinel;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditEventType, AuditLog, AuditStatus, IntegrityReport, NewAuditEvent};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::credentials::{CredentialStatus, CredentialTracker, CredentialType, RotationResult};
    pub use crate::error::{Error, Result};
    pub use crate::health::{HealthReport, HealthStatus};
    pub use crate::ids::EventId;
    pub use crate::metrics::{AlertManager, AlertRule, MetricsCollector, Severity};
    pub use crate::observability::init_tracing;
    pub use crate::rate_limit::{resolve_domain, Admission, RateLimiter};
    pub use crate::sentinel::{Sentinel, SentinelBuilder};
    pub use crate::store::{MemoryStore, Store, StoreHandle};

    #[cfg(feature = "redis")]
    pub use crate::store::RedisStore;
}
