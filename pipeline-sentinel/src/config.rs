//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `SENTINEL_`, nested keys separated by `__`)
//! 2. Current working directory: ./sentinel.toml
//! 3. XDG config directory: ~/.config/pipeline-sentinel/{service_name}/sentinel.toml
//! 4. System directory: /etc/pipeline-sentinel/{service_name}/sentinel.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::AuditConfig;
use crate::credentials::CredentialsConfig;
use crate::error::{Error, Result};
use crate::metrics::AlertsConfig;
use crate::rate_limit::RateLimitConfig;

const APP_DIR: &str = "pipeline-sentinel";
const CONFIG_FILE: &str = "sentinel.toml";
const ENV_PREFIX: &str = "SENTINEL_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Audit log configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Credential rotation configuration
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Alerting configuration
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used in alert payloads and config discovery
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            environment: default_environment(),
        }
    }
}

/// Which store backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; state is lost on restart
    #[default]
    Memory,
    /// Redis store shared by every pipeline instance (`redis` feature)
    Redis,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to use
    #[serde(default)]
    pub backend: StoreBackend,

    /// Upper bound on every store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Redis settings, required when `backend = "redis"`
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            timeout_ms: default_store_timeout_ms(),
            redis: None,
        }
    }
}

impl StoreConfig {
    /// Store call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum pool size
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Maximum connection retry attempts at startup
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in seconds (exponential backoff)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Optimistic transaction retries before an update reports a conflict
    #[serde(default = "default_max_update_retries")]
    pub max_update_retries: u32,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Per-check timeout in milliseconds; a slower check reports degraded
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    /// Store ping latency above which the store reports degraded
    #[serde(default = "default_store_latency_degraded_ms")]
    pub store_latency_degraded_ms: u64,

    /// `rate_limit_blocked` count above which the limiter reports degraded
    #[serde(default = "default_blocked_requests_degraded")]
    pub blocked_requests_degraded: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: default_check_timeout_ms(),
            store_latency_degraded_ms: default_store_latency_degraded_ms(),
            blocked_requests_degraded: default_blocked_requests_degraded(),
        }
    }
}

impl HealthConfig {
    /// Per-check timeout
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

fn default_service_name() -> String {
    APP_DIR.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

fn default_key_prefix() -> String {
    "sentinel".to_string()
}

fn default_redis_max_connections() -> usize {
    16
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_max_update_retries() -> u32 {
    16
}

fn default_check_timeout_ms() -> u64 {
    2_000
}

fn default_store_latency_degraded_ms() -> u64 {
    1_000
}

fn default_blocked_requests_degraded() -> u64 {
    100
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| APP_DIR.to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    ///
    /// This is the recommended way to load config in production.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!(paths = ?config_paths, "Searching for config files");

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Find all possible config file paths for a service
    ///
    /// Returns paths in priority order (highest first).
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_DIR);
        if let Some(path) = xdg_dirs.find_config_file(Path::new(service_name).join(CONFIG_FILE)) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(APP_DIR)
                .join(service_name)
                .join(CONFIG_FILE),
        );

        paths
    }

    /// Reject configurations that would make enforcement meaningless
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(Error::Internal("store.timeout_ms must be greater than 0".into()));
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis.is_none() {
            return Err(Error::Internal(
                "store.backend = \"redis\" requires a [store.redis] section".into(),
            ));
        }
        if self.health.check_timeout_ms == 0 {
            return Err(Error::Internal("health.check_timeout_ms must be greater than 0".into()));
        }

        self.rate_limit
            .validate()
            .map_err(|e| Error::Internal(format!("invalid rate_limit config: {e}")))?;
        self.credentials
            .validate()
            .map_err(|e| Error::Internal(format!("invalid credentials config: {e}")))?;
        self.alerts
            .validate()
            .map_err(|e| Error::Internal(format!("invalid alerts config: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.timeout(), Duration::from_secs(2));
        assert_eq!(config.rate_limit.default.requests_per_minute, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "county-scraper"

[store]
timeout_ms = 250

[rate_limit.domains."example.com"]
requests_per_minute = 2
requests_per_hour = 100
requests_per_day = 1000
burst_limit = 2
cooldown_secs = 30
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.service.name, "county-scraper");
        assert_eq!(config.store.timeout_ms, 250);
        let policy = &config.rate_limit.domains["example.com"];
        assert_eq!(policy.requests_per_minute, 2);
        assert_eq!(policy.burst_violations_before_cooldown, 1);
        // untouched sections keep their defaults
        assert_eq!(config.credentials.warning_days, 14);
    }

    #[test]
    fn test_validate_rejects_redis_without_settings() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Redis;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let mut config = Config::default();
        config.rate_limit.default.requests_per_minute = 0;
        assert!(config.validate().is_err());
    }
}
