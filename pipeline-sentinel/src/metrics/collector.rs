//! Process-local metrics collection
//!
//! Counters and gauges are atomics inside a `DashMap`, so recording never
//! takes a global lock. Histograms and timers keep the most recent
//! [`HISTOGRAM_WINDOW`] samples per series; percentiles are exact
//! nearest-rank over that window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mti::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::store::{StoreHandle, Table};

/// Samples retained per histogram or timer series
pub const HISTOGRAM_WINDOW: usize = 1000;

/// Kind of a metric series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic per process lifetime
    Counter,
    /// Last write wins
    Gauge,
    /// Sampled values
    Histogram,
    /// Sampled durations in seconds
    Timer,
}

/// A persisted metric data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name
    pub name: String,
    /// Kind of series the value came from
    pub kind: MetricKind,
    /// Counter total, gauge value, or histogram mean
    pub value: f64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Sorted labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Summary statistics of a histogram or timer series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    /// Samples in the window
    pub count: usize,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// 50th percentile
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
}

impl HistogramStats {
    fn from_samples(samples: &VecDeque<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sorted.iter().sum::<f64>() / count as f64,
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
        })
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Metric name plus sorted labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.labels.is_empty() {
            let joined: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "{{{}}}", joined.join(","))?;
        }
        Ok(())
    }
}

struct Series {
    kind: MetricKind,
    samples: VecDeque<f64>,
}

impl Series {
    fn push(&mut self, value: f64) {
        if self.samples.len() == HISTOGRAM_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }
}

struct CollectorInner {
    counters: DashMap<MetricKey, AtomicU64>,
    gauges: DashMap<MetricKey, AtomicU64>,
    series: DashMap<MetricKey, Mutex<Series>>,
    started: Instant,
    clock: Arc<dyn Clock>,
}

/// Point-in-time view of every metric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds since the collector was created
    pub uptime_secs: f64,
    /// Counter totals keyed by `name{labels}`
    pub counters: BTreeMap<String, u64>,
    /// Gauge values keyed by `name{labels}`
    pub gauges: BTreeMap<String, f64>,
    /// Histogram and timer statistics keyed by `name{labels}`
    pub histograms: BTreeMap<String, HistogramStats>,
}

/// Thread-safe metrics registry
///
/// Cloning is cheap; clones share the same series.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<CollectorInner>,
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("counters", &self.inner.counters.len())
            .field("gauges", &self.inner.gauges.len())
            .field("series", &self.inner.series.len())
            .finish()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MetricsCollector {
    /// Create an empty collector stamping samples with `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                counters: DashMap::new(),
                gauges: DashMap::new(),
                series: DashMap::new(),
                started: Instant::now(),
                clock,
            }),
        }
    }

    /// Add one to a counter
    pub fn increment(&self, name: &str) {
        self.increment_with(name, &[], 1);
    }

    /// Add `delta` to a counter
    pub fn increment_by(&self, name: &str, delta: u64) {
        self.increment_with(name, &[], delta);
    }

    /// Add `delta` to a labelled counter
    pub fn increment_with(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(counter) = self.inner.counters.get(&key) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.inner
            .counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Set a gauge
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.set_gauge_with(name, &[], value);
    }

    /// Set a labelled gauge
    pub fn set_gauge_with(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(gauge) = self.inner.gauges.get(&key) {
            gauge.store(value.to_bits(), Ordering::Relaxed);
            return;
        }
        self.inner
            .gauges
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Record a histogram sample
    pub fn observe(&self, name: &str, value: f64) {
        self.record(MetricKey::new(name, &[]), MetricKind::Histogram, value);
    }

    /// Record a labelled histogram sample
    pub fn observe_with(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.record(MetricKey::new(name, labels), MetricKind::Histogram, value);
    }

    /// Start a timer that records elapsed seconds when dropped
    #[must_use = "the timer records when dropped; binding it to `_` drops it immediately"]
    pub fn timer(&self, name: &str) -> Timer {
        self.timer_with(name, &[])
    }

    /// Start a labelled timer
    #[must_use = "the timer records when dropped; binding it to `_` drops it immediately"]
    pub fn timer_with(&self, name: &str, labels: &[(&str, &str)]) -> Timer {
        Timer {
            collector: self.clone(),
            key: Some(MetricKey::new(name, labels)),
            started: Instant::now(),
        }
    }

    fn record(&self, key: MetricKey, kind: MetricKind, value: f64) {
        let entry = self.inner.series.entry(key).or_insert_with(|| {
            Mutex::new(Series {
                kind,
                samples: VecDeque::with_capacity(16),
            })
        });
        entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    /// Current total of an unlabelled counter (0 when never incremented)
    pub fn counter(&self, name: &str) -> u64 {
        self.counter_with(name, &[])
    }

    /// Current total of a labelled counter
    pub fn counter_with(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.inner
            .counters
            .get(&MetricKey::new(name, labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current value of an unlabelled gauge
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauge_with(name, &[])
    }

    /// Current value of a labelled gauge
    pub fn gauge_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.inner
            .gauges
            .get(&MetricKey::new(name, labels))
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    /// Statistics of an unlabelled histogram or timer
    pub fn stats(&self, name: &str) -> Option<HistogramStats> {
        self.stats_with(name, &[])
    }

    /// Statistics of a labelled histogram or timer
    pub fn stats_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramStats> {
        let series = self.inner.series.get(&MetricKey::new(name, labels))?;
        let guard = series.lock().unwrap_or_else(PoisonError::into_inner);
        HistogramStats::from_samples(&guard.samples)
    }

    /// Resolve a metric name as used by alert rules
    ///
    /// Counters and gauges resolve by name. Histograms resolve through a
    /// derived suffix: `_p50`, `_p95`, `_p99`, `_avg`, `_max` or `_count`.
    pub fn value_of(&self, metric_name: &str) -> Option<f64> {
        let plain = MetricKey::new(metric_name, &[]);
        if let Some(counter) = self.inner.counters.get(&plain) {
            return Some(counter.load(Ordering::Relaxed) as f64);
        }
        if let Some(gauge) = self.inner.gauges.get(&plain) {
            return Some(f64::from_bits(gauge.load(Ordering::Relaxed)));
        }

        const SUFFIXES: [&str; 6] = ["_p50", "_p95", "_p99", "_avg", "_max", "_count"];
        let (base, suffix) = SUFFIXES
            .iter()
            .find_map(|suffix| metric_name.strip_suffix(suffix).map(|base| (base, *suffix)))?;
        let stats = self.stats(base)?;
        Some(match suffix {
            "_p50" => stats.p50,
            "_p95" => stats.p95,
            "_p99" => stats.p99,
            "_avg" => stats.mean,
            "_max" => stats.max,
            _ => stats.count as f64,
        })
    }

    /// Time since the collector was created
    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Point-in-time view of every series
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .inner
            .counters
            .iter()
            .map(|c| (c.key().to_string(), c.value().load(Ordering::Relaxed)))
            .collect();
        let gauges = self
            .inner
            .gauges
            .iter()
            .map(|g| (g.key().to_string(), f64::from_bits(g.value().load(Ordering::Relaxed))))
            .collect();
        let histograms = self
            .inner
            .series
            .iter()
            .filter_map(|s| {
                let guard = s.value().lock().unwrap_or_else(PoisonError::into_inner);
                HistogramStats::from_samples(&guard.samples).map(|stats| (s.key().to_string(), stats))
            })
            .collect();

        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs_f64(),
            counters,
            gauges,
            histograms,
        }
    }

    /// One sample per series, stamped with the current time
    ///
    /// Histogram and timer series report their mean.
    pub fn samples(&self) -> Vec<MetricSample> {
        let now = self.inner.clock.now();
        let mut samples = Vec::new();

        for c in self.inner.counters.iter() {
            samples.push(MetricSample {
                name: c.key().name.clone(),
                kind: MetricKind::Counter,
                value: c.value().load(Ordering::Relaxed) as f64,
                timestamp: now,
                labels: c.key().labels.clone(),
            });
        }
        for g in self.inner.gauges.iter() {
            samples.push(MetricSample {
                name: g.key().name.clone(),
                kind: MetricKind::Gauge,
                value: f64::from_bits(g.value().load(Ordering::Relaxed)),
                timestamp: now,
                labels: g.key().labels.clone(),
            });
        }
        for s in self.inner.series.iter() {
            let guard = s.value().lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(stats) = HistogramStats::from_samples(&guard.samples) {
                samples.push(MetricSample {
                    name: s.key().name.clone(),
                    kind: guard.kind,
                    value: stats.mean,
                    timestamp: now,
                    labels: s.key().labels.clone(),
                });
            }
        }

        samples
    }

    /// Append a sample for every current series to the metrics table
    ///
    /// Returns the number of samples written.
    pub async fn flush(&self, store: &StoreHandle) -> Result<usize> {
        let samples = self.samples();
        for sample in &samples {
            let key = "smp".create_type_id::<V7>().to_string();
            store
                .append_record(Table::MetricSamples, &key, sample.timestamp, sample)
                .await?;
        }
        tracing::debug!(samples = samples.len(), "Flushed metric samples");
        Ok(samples.len())
    }

    /// Number of series of each kind: (counters, gauges, histograms)
    pub fn series_counts(&self) -> (usize, usize, usize) {
        (
            self.inner.counters.len(),
            self.inner.gauges.len(),
            self.inner.series.len(),
        )
    }
}

/// RAII timer returned by [`MetricsCollector::timer`]
///
/// Records elapsed seconds into a timer series when dropped, including
/// during unwinding and on early returns.
pub struct Timer {
    collector: MetricsCollector,
    key: Option<MetricKey>,
    started: Instant,
}

impl Timer {
    /// Time since the timer started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record now and return the elapsed time
    pub fn stop(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(key) = self.key.take() {
            self.collector
                .record(key, MetricKind::Timer, elapsed.as_secs_f64());
        }
        elapsed
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.collector
                .record(key, MetricKind::Timer, self.started.elapsed().as_secs_f64());
        }
    }
}
