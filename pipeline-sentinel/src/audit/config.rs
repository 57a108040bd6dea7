//! Audit log configuration
//!
//! Loaded from the `[audit]` section of sentinel.toml or environment variables.

use serde::{Deserialize, Serialize};

/// Audit log configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Storage failure alerting
    #[serde(default)]
    pub failure_alerts: FailureAlertConfig,
}

/// Alerting on audit storage outages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAlertConfig {
    /// Raise `audit_storage_unreachable` alerts (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds of continuous failure before alerting (default: 0, first failure)
    #[serde(default)]
    pub threshold_secs: u64,

    /// Minimum seconds between repeated outage alerts (default: 300)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Raise `audit_storage_recovered` once writes succeed again (default: true)
    #[serde(default = "default_true")]
    pub notify_recovery: bool,
}

impl Default for FailureAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_secs: 0,
            cooldown_secs: default_cooldown_secs(),
            notify_recovery: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    300
}
