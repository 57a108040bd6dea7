//! Service wiring
//!
//! [`Sentinel`] owns one instance of every component, all sharing the same
//! store, clock and metrics collector. Build it once at startup and clone it
//! into each pipeline worker.

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StoreBackend};
use crate::credentials::CredentialTracker;
use crate::error::{Error, Result};
use crate::health::{
    AuditHealth, CredentialHealth, HealthChecker, HealthReport, MetricsHealth, RateLimiterHealth, StoreHealth,
};
use crate::metrics::{AlertManager, MetricsCollector, WebhookAlertHook};
use crate::rate_limit::RateLimiter;
use crate::store::{MemoryStore, Store, StoreHandle};

/// All sentinel components, wired together
#[derive(Clone)]
pub struct Sentinel {
    config: Arc<Config>,
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    alerts: AlertManager,
    audit: AuditLog,
    rate_limiter: RateLimiter,
    credentials: CredentialTracker,
    health: HealthChecker,
}

impl Sentinel {
    /// Create a builder
    pub fn builder() -> SentinelBuilder {
        SentinelBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn credentials(&self) -> &CredentialTracker {
        &self.credentials
    }

    /// Run every health check
    pub async fn health_check(&self) -> HealthReport {
        self.health.check().await
    }
}

/// Builder for [`Sentinel`]
pub struct SentinelBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    enable_tracing: bool,
}

impl SentinelBuilder {
    /// Create a new builder with defaults
    ///
    /// By default:
    /// - Config is `Config::default()` if not provided
    /// - The store is chosen by `store.backend`
    /// - The system clock is used
    /// - Tracing is initialized from the config
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            clock: None,
            enable_tracing: true,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of the configured backend
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this clock instead of the system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Skip tracing initialization
    ///
    /// Use this when the application installs its own subscriber.
    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    /// Validate the configuration, connect the store and wire the components
    pub async fn build(self) -> Result<Sentinel> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        if self.enable_tracing {
            crate::observability::init_tracing(&config)?;
        }

        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => connect_store(&config).await?,
        };
        let store = StoreHandle::new(store, config.store.timeout());
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let metrics = MetricsCollector::new(Arc::clone(&clock));
        let alerts = AlertManager::new(metrics.clone(), Arc::clone(&clock));
        if config.alerts.default_rules {
            alerts.add_default_rules();
        }
        for rule in &config.alerts.rules {
            alerts.add_rule(rule.clone());
        }
        for webhook in &config.alerts.webhooks {
            alerts.add_hook(Arc::new(WebhookAlertHook::from_config(webhook)));
        }

        let audit = AuditLog::new(
            store.clone(),
            Arc::clone(&clock),
            metrics.clone(),
            alerts.clone(),
            &config.audit,
            config.service.name.clone(),
        );
        let rate_limiter = RateLimiter::new(
            config.rate_limit.clone(),
            store.clone(),
            audit.clone(),
            metrics.clone(),
            Arc::clone(&clock),
        );
        let credentials = CredentialTracker::new(
            config.credentials.clone(),
            store.clone(),
            audit.clone(),
            metrics.clone(),
            Arc::clone(&clock),
        );

        let health = HealthChecker::new(
            config.service.name.clone(),
            config.health.check_timeout(),
            Arc::clone(&clock),
        )
        .with_check(Arc::new(StoreHealth::new(store.clone(), &config.health)))
        .with_check(Arc::new(AuditHealth::new(audit.clone())))
        .with_check(Arc::new(RateLimiterHealth::new(
            rate_limiter.clone(),
            metrics.clone(),
            &config.health,
        )))
        .with_check(Arc::new(CredentialHealth::new(credentials.clone())))
        .with_check(Arc::new(MetricsHealth::new(metrics.clone())));

        tracing::info!(
            service = %config.service.name,
            store = store.backend_name(),
            rules = alerts.rules().len(),
            webhooks = config.alerts.webhooks.len(),
            "Sentinel ready"
        );

        Ok(Sentinel {
            config: Arc::new(config),
            store,
            clock,
            metrics,
            alerts,
            audit,
            rate_limiter,
            credentials,
            health,
        })
    }
}

impl Default for SentinelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let redis = config
                .store
                .redis
                .as_ref()
                .ok_or_else(|| Error::Internal("store.backend = \"redis\" requires [store.redis]".into()))?;
            Ok(Arc::new(crate::store::RedisStore::connect(redis).await?))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(Error::Internal(
            "store.backend = \"redis\" requires the `redis` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;

    #[tokio::test]
    async fn test_build_with_defaults() {
        let sentinel = Sentinel::builder().without_tracing().build().await.unwrap();
        assert_eq!(sentinel.store().backend_name(), "memory");
        assert_eq!(sentinel.alerts().rules().len(), 7);

        let report = sentinel.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.components.len(), 5);
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = Config::default();
        config.rate_limit.default.requests_per_day = 0;
        let result = Sentinel::builder().config(config).without_tracing().build().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_rules_can_be_disabled() {
        let mut config = Config::default();
        config.alerts.default_rules = false;
        let sentinel = Sentinel::builder()
            .config(config)
            .without_tracing()
            .build()
            .await
            .unwrap();
        assert!(sentinel.alerts().rules().is_empty());
    }
}
