//! Audit storage failure tracking
//!
//! Tracks consecutive failed audit writes and raises an
//! `audit_storage_unreachable` alert once the outage outlasts the configured
//! threshold (and the previous alert's cooldown has elapsed). The first
//! successful write after an alert raises `audit_storage_recovered`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use super::config::FailureAlertConfig;
use crate::clock::{seconds, Clock};
use crate::metrics::{Alert, AlertManager, Severity};

/// Internal state protected by a `std::sync::Mutex`
///
/// The mutex is never held while alerts are published.
#[derive(Default)]
struct TrackerState {
    /// Time of the first failure in the current outage
    first_failure_at: Option<DateTime<Utc>>,
    /// Number of consecutive storage failures
    consecutive_failures: u64,
    /// Error message from the most recent failure
    last_error: String,
    /// When the last outage alert was raised
    last_alert_at: Option<DateTime<Utc>>,
    /// Whether an outage alert is active (used for recovery detection)
    alert_active: bool,
}

/// Current outage state, for health reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSnapshot {
    /// Consecutive failed writes (0 when healthy)
    pub consecutive_failures: u64,
    /// Start of the current outage
    pub first_failure_at: Option<DateTime<Utc>>,
    /// Most recent error message
    pub last_error: Option<String>,
    /// Whether an outage alert has been raised and not yet recovered
    pub alert_active: bool,
}

/// Tracks audit storage failures and raises outage alerts
pub(crate) struct FailureTracker {
    state: Mutex<TrackerState>,
    alerts: AlertManager,
    clock: Arc<dyn Clock>,
    config: FailureAlertConfig,
    service_name: String,
}

impl FailureTracker {
    pub(crate) fn new(
        alerts: AlertManager,
        clock: Arc<dyn Clock>,
        config: FailureAlertConfig,
        service_name: String,
    ) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            alerts,
            clock,
            config,
            service_name,
        }
    }

    /// Record a failed audit write
    pub(crate) fn record_failure(&self, error: &str) {
        let alert = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let now = self.clock.now();

            let first_failure_at = *state.first_failure_at.get_or_insert(now);
            state.consecutive_failures += 1;
            state.last_error = error.to_string();

            let outage = now - first_failure_at;
            let cooldown_ok = state
                .last_alert_at
                .map(|last| now - last >= seconds(self.config.cooldown_secs))
                .unwrap_or(true);

            if self.config.enabled
                && outage >= seconds(self.config.threshold_secs)
                && cooldown_ok
            {
                state.last_alert_at = Some(now);
                state.alert_active = true;
                Some(Alert {
                    rule_name: "audit_storage_unreachable".to_string(),
                    metric_name: "audit_write_failures".to_string(),
                    current_value: state.consecutive_failures as f64,
                    threshold: self.config.threshold_secs as f64,
                    severity: Severity::Critical,
                    triggered_at: now,
                    message: format!(
                        "Audit storage for {} unreachable for {}s ({} consecutive failures): {}",
                        self.service_name,
                        outage.num_seconds(),
                        state.consecutive_failures,
                        state.last_error
                    ),
                })
            } else {
                None
            }
        }; // lock dropped here

        if let Some(alert) = alert {
            self.alerts.raise(alert);
        }
    }

    /// Record a successful audit write
    pub(crate) fn record_success(&self) {
        let alert = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.consecutive_failures == 0 && !state.alert_active {
                return;
            }

            let now = self.clock.now();
            let alert = match state.first_failure_at {
                Some(started) if state.alert_active && self.config.notify_recovery => Some(Alert {
                    rule_name: "audit_storage_recovered".to_string(),
                    metric_name: "audit_write_failures".to_string(),
                    current_value: 0.0,
                    threshold: self.config.threshold_secs as f64,
                    severity: Severity::Info,
                    triggered_at: now,
                    message: format!(
                        "Audit storage for {} recovered after {}s ({} failed writes)",
                        self.service_name,
                        (now - started).num_seconds().max(0),
                        state.consecutive_failures
                    ),
                }),
                _ => None,
            };

            let last_alert_at = state.last_alert_at;
            *state = TrackerState {
                last_alert_at,
                ..TrackerState::default()
            };
            alert
        }; // lock dropped here

        if let Some(alert) = alert {
            self.alerts.raise(alert);
        }
    }

    /// Current outage state
    pub(crate) fn snapshot(&self) -> FailureSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        FailureSnapshot {
            consecutive_failures: state.consecutive_failures,
            first_failure_at: state.first_failure_at,
            last_error: (!state.last_error.is_empty()).then(|| state.last_error.clone()),
            alert_active: state.alert_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use crate::metrics::MetricsCollector;

    fn tracker(threshold_secs: u64, cooldown_secs: u64) -> (FailureTracker, AlertManager, ManualClock) {
        let clock = ManualClock::default();
        let alerts = AlertManager::new(MetricsCollector::default(), Arc::new(clock.clone()));
        let config = FailureAlertConfig {
            enabled: true,
            threshold_secs,
            cooldown_secs,
            notify_recovery: true,
        };
        let tracker = FailureTracker::new(alerts.clone(), Arc::new(clock.clone()), config, "test-service".into());
        (tracker, alerts, clock)
    }

    fn count(alerts: &AlertManager, rule: &str) -> usize {
        alerts
            .recent_alerts(24)
            .iter()
            .filter(|a| a.rule_name == rule)
            .count()
    }

    #[test]
    fn threshold_triggers_alert() {
        let (tracker, alerts, _) = tracker(0, 3600);
        tracker.record_failure("connection refused");
        assert_eq!(count(&alerts, "audit_storage_unreachable"), 1);
        assert!(tracker.snapshot().alert_active);
    }

    #[test]
    fn no_alert_before_threshold() {
        let (tracker, alerts, clock) = tracker(60, 3600);
        tracker.record_failure("connection refused");
        clock.advance(Duration::seconds(30));
        tracker.record_failure("connection refused");
        assert_eq!(count(&alerts, "audit_storage_unreachable"), 0);

        clock.advance(Duration::seconds(30));
        tracker.record_failure("connection refused");
        assert_eq!(count(&alerts, "audit_storage_unreachable"), 1);
        assert_eq!(tracker.snapshot().consecutive_failures, 3);
    }

    #[test]
    fn cooldown_prevents_duplicates() {
        let (tracker, alerts, clock) = tracker(0, 3600);
        tracker.record_failure("error 1");
        tracker.record_failure("error 2");
        tracker.record_failure("error 3");
        assert_eq!(count(&alerts, "audit_storage_unreachable"), 1);

        clock.advance(Duration::seconds(3600));
        tracker.record_failure("error 4");
        assert_eq!(count(&alerts, "audit_storage_unreachable"), 2);
    }

    #[test]
    fn recovery_after_alert() {
        let (tracker, alerts, _) = tracker(0, 3600);
        tracker.record_failure("connection refused");
        tracker.record_success();
        assert_eq!(count(&alerts, "audit_storage_recovered"), 1);
        assert_eq!(tracker.snapshot(), FailureSnapshot::default());
    }

    #[test]
    fn no_recovery_without_alert() {
        let (tracker, alerts, _) = tracker(60, 3600);
        tracker.record_failure("transient error");
        tracker.record_success();
        assert_eq!(count(&alerts, "audit_storage_unreachable"), 0);
        assert_eq!(count(&alerts, "audit_storage_recovered"), 0);
    }
}
