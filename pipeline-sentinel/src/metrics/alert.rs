//! Threshold alerting over collected metrics
//!
//! [`AlertManager::evaluate`] checks every rule against the current metric
//! values; a firing rule enters a per-rule cooldown. [`AlertManager::raise`]
//! bypasses rules for direct escalations such as integrity violations.
//! Fired alerts go to every registered [`AlertHook`] through `tokio::spawn`,
//! so a slow hook never blocks the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::collector::MetricsCollector;
use crate::clock::{seconds, Clock};

/// Alerts kept for [`AlertManager::recent_alerts`]
const HISTORY_LIMIT: usize = 1000;

/// Comparison between a metric value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// value > threshold
    Gt,
    /// value < threshold
    Lt,
    /// value >= threshold
    Gte,
    /// value <= threshold
    Lte,
    /// value == threshold
    Eq,
}

impl Comparison {
    /// Whether `value` satisfies the comparison against `threshold`
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Eq => "eq",
        })
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Something failed
    Error,
    /// Enforcement or evidence is at risk
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        })
    }
}

/// A threshold rule over one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name
    pub name: String,
    /// Metric to read, including derived histogram names such as `x_p95`
    pub metric_name: String,
    /// How the value is compared with the threshold
    pub condition: Comparison,
    /// Threshold value
    pub threshold: f64,
    /// Severity of fired alerts
    pub severity: Severity,
    /// Minimum seconds between two firings
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Human-readable description, used as the alert message prefix
    #[serde(default)]
    pub description: String,
}

fn default_cooldown_seconds() -> u64 {
    300
}

impl AlertRule {
    /// Create a rule with the default cooldown
    pub fn new(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        condition: Comparison,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.into(),
            condition,
            threshold,
            severity,
            cooldown_seconds: default_cooldown_seconds(),
            description: String::new(),
        }
    }

    /// Set the cooldown
    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Built-in rules for pipeline runs
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("high_error_rate", "action_errors", Comparison::Gt, 10.0, Severity::Error)
            .with_description("Action error count exceeded threshold"),
        AlertRule::new("slow_action", "action_duration_p95", Comparison::Gt, 30.0, Severity::Warning)
            .with_description("95th percentile action duration is too high"),
        AlertRule::new("rate_limit_violations", "rate_limit_blocked", Comparison::Gt, 50.0, Severity::Warning)
            .with_description("Too many rate limit violations"),
        AlertRule::new("low_quality_score", "quality_score_avg", Comparison::Lt, 50.0, Severity::Error)
            .with_description("Average quality score is below threshold"),
        AlertRule::new("audit_write_failures", "audit_write_failures", Comparison::Gt, 0.0, Severity::Critical)
            .with_description("Audit events could not be persisted"),
        AlertRule::new("rate_limit_store_errors", "rate_limit_store_errors", Comparison::Gt, 0.0, Severity::Critical)
            .with_description("Rate limit state could not be read or persisted"),
        AlertRule::new("integrity_violations", "integrity_violations", Comparison::Gt, 0.0, Severity::Critical)
            .with_description("Audit events failed checksum verification"),
    ]
}

/// A fired alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Rule (or escalation) that produced the alert
    pub rule_name: String,
    /// Metric the alert is about
    pub metric_name: String,
    /// Metric value at firing time
    pub current_value: f64,
    /// Rule threshold
    pub threshold: f64,
    /// Severity
    pub severity: Severity,
    /// Firing time
    pub triggered_at: DateTime<Utc>,
    /// Human-readable message
    pub message: String,
}

/// Receiver of fired alerts
///
/// Invoked inside `tokio::spawn`; implementations handle their own errors
/// (log and continue) and must not panic.
#[async_trait]
pub trait AlertHook: Send + Sync + 'static {
    /// Called once per fired alert
    async fn on_alert(&self, alert: Alert);
}

struct AlertInner {
    metrics: MetricsCollector,
    clock: Arc<dyn Clock>,
    rules: RwLock<Vec<AlertRule>>,
    last_fired: DashMap<String, DateTime<Utc>>,
    history: Mutex<VecDeque<Alert>>,
    hooks: RwLock<Vec<Arc<dyn AlertHook>>>,
}

/// Evaluates alert rules and dispatches fired alerts
#[derive(Clone)]
pub struct AlertManager {
    inner: Arc<AlertInner>,
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertManager")
            .field("rules", &self.rules().len())
            .finish()
    }
}

impl AlertManager {
    /// Create a manager with no rules
    pub fn new(metrics: MetricsCollector, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(AlertInner {
                metrics,
                clock,
                rules: RwLock::new(Vec::new()),
                last_fired: DashMap::new(),
                history: Mutex::new(VecDeque::new()),
                hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Add a rule, replacing any rule with the same name
    pub fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.inner.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.retain(|r| r.name != rule.name);
        rules.push(rule);
    }

    /// Add [`default_rules`]
    pub fn add_default_rules(&self) {
        for rule in default_rules() {
            self.add_rule(rule);
        }
    }

    /// Remove a rule by name; returns whether it existed
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.inner.rules.write().unwrap_or_else(PoisonError::into_inner);
        let before = rules.len();
        rules.retain(|r| r.name != name);
        self.inner.last_fired.remove(name);
        rules.len() != before
    }

    /// Configured rules
    pub fn rules(&self) -> Vec<AlertRule> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a hook for fired alerts
    pub fn add_hook(&self, hook: Arc<dyn AlertHook>) {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Check every rule and return the alerts fired by this call
    ///
    /// A rule whose metric does not exist yet is skipped. A rule fires when
    /// its condition holds and its cooldown has elapsed since it last fired.
    pub fn evaluate(&self) -> Vec<Alert> {
        let now = self.inner.clock.now();
        let mut fired = Vec::new();

        for rule in self.rules() {
            let Some(value) = self.inner.metrics.value_of(&rule.metric_name) else {
                continue;
            };
            if !rule.condition.holds(value, rule.threshold) {
                continue;
            }
            if !self.claim_cooldown(&rule, now) {
                continue;
            }

            let description = if rule.description.is_empty() {
                rule.name.as_str()
            } else {
                rule.description.as_str()
            };
            let alert = Alert {
                rule_name: rule.name.clone(),
                metric_name: rule.metric_name.clone(),
                current_value: value,
                threshold: rule.threshold,
                severity: rule.severity,
                triggered_at: now,
                message: format!("{description}: {value} {} {}", rule.condition, rule.threshold),
            };
            self.publish(alert.clone());
            fired.push(alert);
        }

        fired
    }

    /// Atomically check the rule's cooldown and mark it fired
    fn claim_cooldown(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        let cooldown = seconds(rule.cooldown_seconds);
        match self.inner.last_fired.entry(rule.name.clone()) {
            Entry::Occupied(mut last) => {
                if now - *last.get() >= cooldown {
                    last.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Publish an alert that did not come from a rule
    pub fn raise(&self, alert: Alert) {
        self.publish(alert);
    }

    /// Alerts fired within the last `hours`, oldest first
    pub fn recent_alerts(&self, hours: i64) -> Vec<Alert> {
        let cutoff = self.inner.clock.now() - Duration::hours(hours);
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.triggered_at > cutoff)
            .cloned()
            .collect()
    }

    fn publish(&self, alert: Alert) {
        match alert.severity {
            Severity::Info => tracing::info!(
                alert = %alert.rule_name,
                metric = %alert.metric_name,
                value = alert.current_value,
                "{}", alert.message
            ),
            Severity::Warning => tracing::warn!(
                alert = %alert.rule_name,
                metric = %alert.metric_name,
                value = alert.current_value,
                "{}", alert.message
            ),
            Severity::Error | Severity::Critical => tracing::error!(
                alert = %alert.rule_name,
                severity = %alert.severity,
                metric = %alert.metric_name,
                value = alert.current_value,
                "{}", alert.message
            ),
        }

        self.inner
            .metrics
            .increment_with("alerts_fired", &[("severity", &alert.severity.to_string())], 1);

        {
            let mut history = self.inner.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        self.dispatch(alert);
    }

    /// Dispatch an alert to all hooks via `tokio::spawn`
    fn dispatch(&self, alert: Alert) {
        let hooks = self
            .inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if hooks.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(alert = %alert.rule_name, "No async runtime; alert hooks skipped");
            return;
        };
        for hook in hooks {
            let alert = alert.clone();
            runtime.spawn(async move {
                hook.on_alert(alert).await;
            });
        }
    }
}
