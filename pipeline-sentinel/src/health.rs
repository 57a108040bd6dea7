//! Health checks
//!
//! [`HealthChecker::check`] runs every registered [`HealthCheck`]
//! concurrently, each bounded by its own timeout. A check that does not answer
//! in time is reported as degraded rather than holding up the report.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::credentials::{CredentialStatus, CredentialTracker};
use crate::metrics::MetricsCollector;
use crate::rate_limit::RateLimiter;
use crate::store::StoreHandle;

/// Health status of a component or of the whole service
///
/// Ordered from best to worst, so the overall status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name (store, audit, rate_limiter, credentials, metrics)
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time the check took
    pub latency_ms: u64,
    /// Component-specific figures
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            latency_ms: 0,
            details: Value::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// One component health check
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    /// Component name used in the report
    fn name(&self) -> &str;

    /// Sample the component
    async fn check(&self) -> ComponentHealth;
}

/// Aggregated health of the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst component status; healthy when there are no checks
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub checked_at: DateTime<Utc>,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    /// Status of a named component
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Runs checks concurrently and aggregates their results
#[derive(Clone)]
pub struct HealthChecker {
    service: String,
    check_timeout: Duration,
    clock: Arc<dyn Clock>,
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("service", &self.service)
            .field("check_timeout", &self.check_timeout)
            .field("checks", &self.checks.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

impl HealthChecker {
    /// Create a checker with no checks
    pub fn new(service: impl Into<String>, check_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            service: service.into(),
            check_timeout,
            clock,
            checks: Vec::new(),
        }
    }

    /// Register a check
    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Run every check and aggregate
    pub async fn check(&self) -> HealthReport {
        let timeout = self.check_timeout;
        let components = join_all(self.checks.iter().map(|check| async move {
            let started = Instant::now();
            let mut health = match tokio::time::timeout(timeout, check.check()).await {
                Ok(health) => health,
                Err(_) => ComponentHealth::new(check.name(), HealthStatus::Degraded)
                    .with_message(format!("health check timed out after {}ms", timeout.as_millis())),
            };
            health.latency_ms = started.elapsed().as_millis() as u64;
            health
        }))
        .await;

        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        if status != HealthStatus::Healthy {
            let failing: Vec<&str> = components
                .iter()
                .filter(|c| c.status != HealthStatus::Healthy)
                .map(|c| c.name.as_str())
                .collect();
            tracing::warn!(status = ?status, components = ?failing, "Health check not healthy");
        }

        HealthReport {
            status,
            service: self.service.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checked_at: self.clock.now(),
            components,
        }
    }
}

/// Store connectivity and latency
pub struct StoreHealth {
    store: StoreHandle,
    degraded_after: Duration,
}

impl StoreHealth {
    pub fn new(store: StoreHandle, config: &HealthConfig) -> Self {
        Self {
            store,
            degraded_after: Duration::from_millis(config.store_latency_degraded_ms),
        }
    }
}

#[async_trait]
impl HealthCheck for StoreHealth {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> ComponentHealth {
        match self.store.sample_latency().await {
            Ok(sample) => {
                let slow = sample.latency_ms > self.degraded_after.as_millis() as u64;
                let health = ComponentHealth::new(
                    "store",
                    if slow { HealthStatus::Degraded } else { HealthStatus::Healthy },
                )
                .with_details(json!({ "backend": sample.backend, "latency_ms": sample.latency_ms }));
                if slow {
                    health.with_message(format!("store latency {}ms", sample.latency_ms))
                } else {
                    health
                }
            }
            Err(e) => ComponentHealth::new("store", HealthStatus::Unhealthy)
                .with_message(e.to_string())
                .with_details(json!({ "backend": self.store.backend_name() })),
        }
    }
}

/// Audit write path, from the storage failure tracker
pub struct AuditHealth {
    audit: AuditLog,
}

impl AuditHealth {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl HealthCheck for AuditHealth {
    fn name(&self) -> &str {
        "audit"
    }

    async fn check(&self) -> ComponentHealth {
        let snapshot = self.audit.failure_snapshot();
        let status = if snapshot.alert_active {
            HealthStatus::Unhealthy
        } else if snapshot.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let health = ComponentHealth::new("audit", status).with_details(json!({
            "consecutive_failures": snapshot.consecutive_failures,
            "first_failure_at": snapshot.first_failure_at,
        }));
        match snapshot.last_error {
            Some(error) => health.with_message(error),
            None => health,
        }
    }
}

/// Rejection pressure on the rate limiter
pub struct RateLimiterHealth {
    limiter: RateLimiter,
    metrics: MetricsCollector,
    blocked_degraded: u64,
}

impl RateLimiterHealth {
    pub fn new(limiter: RateLimiter, metrics: MetricsCollector, config: &HealthConfig) -> Self {
        Self {
            limiter,
            metrics,
            blocked_degraded: config.blocked_requests_degraded,
        }
    }
}

#[async_trait]
impl HealthCheck for RateLimiterHealth {
    fn name(&self) -> &str {
        "rate_limiter"
    }

    async fn check(&self) -> ComponentHealth {
        let blocked = self.metrics.counter("rate_limit_blocked");
        let store_errors = self.metrics.counter("rate_limit_store_errors");
        let status = if blocked > self.blocked_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let health = ComponentHealth::new("rate_limiter", status).with_details(json!({
            "tracked_domains": self.limiter.tracked_domains(),
            "domains_in_cooldown": self.limiter.domains_in_cooldown(),
            "checks": self.metrics.counter("rate_limit_checks"),
            "blocked": blocked,
            "store_errors": store_errors,
        }));
        if status == HealthStatus::Degraded {
            health.with_message(format!("{blocked} requests blocked"))
        } else {
            health
        }
    }
}

/// Expired or soon-expiring credentials
pub struct CredentialHealth {
    tracker: CredentialTracker,
}

impl CredentialHealth {
    pub fn new(tracker: CredentialTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl HealthCheck for CredentialHealth {
    fn name(&self) -> &str {
        "credentials"
    }

    async fn check(&self) -> ComponentHealth {
        let reports = match self.tracker.rotation_status().await {
            Ok(reports) => reports,
            Err(e) => {
                return ComponentHealth::new("credentials", HealthStatus::Degraded)
                    .with_message(format!("credential status unavailable: {e}"))
            }
        };
        let named = |wanted: CredentialStatus| -> Vec<&'static str> {
            reports
                .iter()
                .filter(|r| r.status == wanted)
                .map(|r| r.credential_type.as_str())
                .collect()
        };
        let expired = named(CredentialStatus::Expired);
        let expiring = named(CredentialStatus::ExpiringSoon);

        let (status, message) = if !expired.is_empty() {
            (HealthStatus::Unhealthy, Some(format!("expired: {}", expired.join(", "))))
        } else if !expiring.is_empty() {
            (HealthStatus::Degraded, Some(format!("rotation due: {}", expiring.join(", "))))
        } else {
            (HealthStatus::Healthy, None)
        };
        let health = ComponentHealth::new("credentials", status).with_details(json!({
            "expired": expired,
            "expiring_soon": expiring,
            "rotations_in_flight": self.tracker.rotations_in_flight(),
        }));
        match message {
            Some(message) => health.with_message(message),
            None => health,
        }
    }
}

/// Collector liveness and series counts
pub struct MetricsHealth {
    metrics: MetricsCollector,
}

impl MetricsHealth {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl HealthCheck for MetricsHealth {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn check(&self) -> ComponentHealth {
        let (counters, gauges, histograms) = self.metrics.series_counts();
        ComponentHealth::new("metrics", HealthStatus::Healthy).with_details(json!({
            "uptime_secs": self.metrics.uptime().as_secs(),
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    struct Fixed(&'static str, HealthStatus);

    #[async_trait]
    impl HealthCheck for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn check(&self) -> ComponentHealth {
            ComponentHealth::new(self.0, self.1)
        }
    }

    struct Hanging;

    #[async_trait]
    impl HealthCheck for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn check(&self) -> ComponentHealth {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ComponentHealth::new("hanging", HealthStatus::Healthy)
        }
    }

    fn checker() -> HealthChecker {
        HealthChecker::new("test", Duration::from_millis(50), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_no_checks_is_healthy() {
        let report = checker().check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let report = checker()
            .with_check(Arc::new(Fixed("a", HealthStatus::Healthy)))
            .with_check(Arc::new(Fixed("b", HealthStatus::Degraded)))
            .check()
            .await;
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = checker()
            .with_check(Arc::new(Fixed("a", HealthStatus::Degraded)))
            .with_check(Arc::new(Fixed("b", HealthStatus::Unhealthy)))
            .check()
            .await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_timed_out_check_is_degraded() {
        let started = Instant::now();
        let report = checker()
            .with_check(Arc::new(Hanging))
            .with_check(Arc::new(Fixed("ok", HealthStatus::Healthy)))
            .check()
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.status, HealthStatus::Degraded);
        let hanging = report.component("hanging").unwrap();
        assert_eq!(hanging.status, HealthStatus::Degraded);
        assert!(hanging.message.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_store_check_reports_outage_and_latency() {
        let memory = Arc::new(MemoryStore::new());
        let store = StoreHandle::new(memory.clone(), Duration::from_millis(200));
        let config = HealthConfig {
            store_latency_degraded_ms: 10,
            ..HealthConfig::default()
        };
        let check = StoreHealth::new(store, &config);

        assert_eq!(check.check().await.status, HealthStatus::Healthy);

        memory.set_latency(Duration::from_millis(30));
        assert_eq!(check.check().await.status, HealthStatus::Degraded);

        memory.set_latency(Duration::ZERO);
        memory.set_unavailable(true);
        assert_eq!(check.check().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_metrics_check_details() {
        let metrics = MetricsCollector::default();
        metrics.increment("a");
        metrics.set_gauge("b", 1.0);
        let health = MetricsHealth::new(metrics).check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details["counters"], json!(1));
        assert_eq!(health.details["gauges"], json!(1));
    }
}
