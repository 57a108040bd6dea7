//! Alerting configuration
//!
//! Loaded from the `[alerts]` section of sentinel.toml or environment variables.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::alert::{AlertRule, Severity};

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Install the built-in rule set (default: true)
    #[serde(default = "default_true")]
    pub default_rules: bool,

    /// Additional rules; a rule named like a built-in one replaces it
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    /// Webhooks notified of fired alerts
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            default_rules: true,
            rules: Vec::new(),
            webhooks: Vec::new(),
        }
    }
}

impl AlertsConfig {
    /// Validate rule names and webhook URLs
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err("alert rule name must not be empty".to_string());
            }
            if rule.metric_name.trim().is_empty() {
                return Err(format!("alert rule {} has no metric_name", rule.name));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(format!("duplicate alert rule {}", rule.name));
            }
        }
        for webhook in &self.webhooks {
            reqwest::Url::parse(&webhook.url)
                .map_err(|e| format!("invalid webhook url {}: {e}", webhook.url))?;
        }
        Ok(())
    }
}

/// A webhook receiving alerts as JSON POSTs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Destination URL
    pub url: String,

    /// Request timeout in seconds (default: 10)
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    /// Extra headers, e.g. `Authorization`
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Alerts below this severity are not sent (default: warning)
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
}

fn default_true() -> bool {
    true
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_min_severity() -> Severity {
    Severity::Warning
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::alert::Comparison;

    #[test]
    fn test_alerts_config_defaults() {
        let config = AlertsConfig::default();
        assert!(config.default_rules);
        assert!(config.rules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_defaults_from_json() {
        let config: AlertsConfig = serde_json::from_str(
            r#"{"rules":[{"name":"r","metric_name":"m","condition":"gte","threshold":3,"severity":"error"}],
                "webhooks":[{"url":"https://hooks.example.com/x"}]}"#,
        )
        .unwrap();
        assert!(config.default_rules);
        assert_eq!(config.rules[0].condition, Comparison::Gte);
        assert_eq!(config.rules[0].cooldown_seconds, 300);
        assert_eq!(config.webhooks[0].timeout_secs, 10);
        assert_eq!(config.webhooks[0].min_severity, Severity::Warning);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_urls() {
        let rule = AlertRule::new("r", "m", Comparison::Gt, 1.0, Severity::Info);
        let config = AlertsConfig {
            rules: vec![rule.clone(), rule],
            ..AlertsConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AlertsConfig {
            webhooks: vec![WebhookConfig {
                url: "not a url".into(),
                timeout_secs: 1,
                headers: HashMap::new(),
                min_severity: Severity::Info,
            }],
            ..AlertsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
