//! Webhook alert hook
//!
//! Posts JSON-serialized [`Alert`]s to a configured HTTP endpoint. Errors are
//! logged and dropped with no retries, so a failing endpoint cannot stall
//! alerting itself.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::alert::{Alert, AlertHook, Severity};
use super::config::WebhookConfig;

/// Alert hook that POSTs alerts as JSON
pub struct WebhookAlertHook {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    min_severity: Severity,
}

impl WebhookAlertHook {
    /// Create a new webhook alert hook
    ///
    /// # Arguments
    ///
    /// * `url`: Destination URL for POST requests
    /// * `timeout`: HTTP request timeout
    /// * `headers`: Additional headers to include (e.g., `Authorization`)
    /// * `min_severity`: Alerts below this severity are not sent
    pub fn new(
        url: String,
        timeout: Duration,
        headers: HashMap<String, String>,
        min_severity: Severity,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            headers,
            min_severity,
        }
    }

    /// Build a hook from its configuration section
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(
            config.url.clone(),
            Duration::from_secs(config.timeout_secs),
            config.headers.clone(),
            config.min_severity,
        )
    }

    /// Whether an alert is severe enough to be sent
    pub fn accepts(&self, alert: &Alert) -> bool {
        alert.severity >= self.min_severity
    }
}

#[async_trait]
impl AlertHook for WebhookAlertHook {
    async fn on_alert(&self, alert: Alert) {
        if !self.accepts(&alert) {
            return;
        }

        let mut request = self.client.post(&self.url).json(&alert);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) => {
                if !response.status().is_success() {
                    tracing::warn!(
                        url = %self.url,
                        status = %response.status(),
                        alert = %alert.rule_name,
                        "Alert webhook returned non-success status"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    url = %self.url,
                    error = %e,
                    alert = %alert.rule_name,
                    "Failed to send alert webhook"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(severity: Severity) -> Alert {
        Alert {
            rule_name: "integrity_violations".into(),
            metric_name: "integrity_violations".into(),
            current_value: 1.0,
            threshold: 0.0,
            severity,
            triggered_at: Utc::now(),
            message: "checksum mismatch".into(),
        }
    }

    #[test]
    fn test_severity_filter() {
        let hook = WebhookAlertHook::new(
            "http://127.0.0.1:9/alerts".into(),
            Duration::from_millis(100),
            HashMap::new(),
            Severity::Error,
        );
        assert!(!hook.accepts(&alert(Severity::Warning)));
        assert!(hook.accepts(&alert(Severity::Error)));
        assert!(hook.accepts(&alert(Severity::Critical)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        let hook = WebhookAlertHook::new(
            "http://127.0.0.1:9/alerts".into(),
            Duration::from_millis(200),
            HashMap::from([("Authorization".to_string(), "Bearer t".to_string())]),
            Severity::Info,
        );
        hook.on_alert(alert(Severity::Critical)).await;
    }
}
