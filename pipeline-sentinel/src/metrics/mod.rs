//! Metrics collection and alerting
//!
//! [`MetricsCollector`] records counters, gauges, histograms and timers;
//! [`AlertManager`] evaluates threshold rules over those values and fans
//! fired alerts out to [`AlertHook`]s such as [`WebhookAlertHook`].

pub mod alert;
pub mod alert_webhook;
pub mod collector;
pub mod config;

pub use alert::{default_rules, Alert, AlertHook, AlertManager, AlertRule, Comparison, Severity};
pub use alert_webhook::WebhookAlertHook;
pub use collector::{
    HistogramStats, MetricKind, MetricSample, MetricsCollector, MetricsSnapshot, Timer,
    HISTOGRAM_WINDOW,
};
pub use config::{AlertsConfig, WebhookConfig};
