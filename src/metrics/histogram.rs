//! Histograms over a bounded window of recent observations.
//!
//! Each label combination keeps at most `capacity` samples; observing past
//! capacity evicts the oldest. Statistics are derived on demand from the
//! sorted window, so they describe the most recent `capacity` observations.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::{report, MetricError};
use super::labels::{LabelKey, LabelSchema};
use super::value::{MetricKind, MetricValue};

/// Default upper bounds, in seconds, used for Prometheus buckets.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Default per-series sample window.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Summary statistics over a sample window. All zero when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl HistogramStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        Self {
            count: count as u64,
            sum,
            avg: sum / count as f64,
            min: sorted[0],
            max: sorted[count - 1],
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile: the value at rank `ceil(p/100 * n)` (1-based).
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (percentile * n as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

struct Window {
    samples: VecDeque<f64>,
}

impl Window {
    fn push(&mut self, value: f64, capacity: usize) {
        while self.samples.len() >= capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }
}

/// A value distribution per label combination.
pub struct Histogram {
    name: String,
    description: String,
    schema: LabelSchema,
    buckets: Vec<f64>,
    capacity: usize,
    windows: Mutex<BTreeMap<LabelKey, Window>>,
    warned: AtomicBool,
}

impl Histogram {
    pub(crate) fn new(
        name: &str,
        description: &str,
        labels: &[&str],
        buckets: Option<&[f64]>,
        capacity: usize,
    ) -> Self {
        let mut buckets: Vec<f64> = buckets
            .unwrap_or(DEFAULT_BUCKETS)
            .iter()
            .copied()
            .filter(|b| b.is_finite())
            .collect();
        buckets.sort_by(f64::total_cmp);
        buckets.dedup();

        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema: LabelSchema::new(labels),
            buckets,
            capacity: capacity.max(1),
            windows: Mutex::new(BTreeMap::new()),
            warned: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `value` to the window for `labels`, evicting the oldest sample
    /// at capacity.
    pub fn observe(&self, value: f64, labels: &[&str]) -> Result<(), MetricError> {
        let key = self.schema.key(&self.name, labels).map_err(|err| {
            report(&err, &self.warned);
            err
        })?;
        let mut windows = self.windows.lock();
        windows
            .entry(key)
            .or_insert_with(|| Window {
                samples: VecDeque::new(),
            })
            .push(value, self.capacity);
        Ok(())
    }

    /// Start a timer that observes elapsed seconds when dropped.
    pub fn start_timer<'a>(&'a self, labels: &[&str]) -> HistogramTimer<'a> {
        HistogramTimer {
            histogram: self,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            started: Instant::now(),
            observed: false,
        }
    }

    pub fn get_stats(&self, labels: &[&str]) -> Result<HistogramStats, MetricError> {
        let key = self.schema.key(&self.name, labels)?;
        let samples = self.samples_for(&key);
        Ok(HistogramStats::from_samples(&samples))
    }

    fn samples_for(&self, key: &LabelKey) -> Vec<f64> {
        self.windows
            .lock()
            .get(key)
            .map(|w| w.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Stats and cumulative bucket counts for every observed series.
    pub(crate) fn series(&self) -> Vec<(LabelKey, HistogramStats, Vec<u64>)> {
        let snapshot: Vec<(LabelKey, Vec<f64>)> = self
            .windows
            .lock()
            .iter()
            .map(|(k, w)| (k.clone(), w.samples.iter().copied().collect()))
            .collect();

        snapshot
            .into_iter()
            .map(|(key, samples)| {
                let buckets = self
                    .buckets
                    .iter()
                    .map(|bound| samples.iter().filter(|v| **v <= *bound).count() as u64)
                    .collect();
                (key, HistogramStats::from_samples(&samples), buckets)
            })
            .collect()
    }

    /// One value per series: the window sum.
    pub fn collect(&self) -> Vec<MetricValue> {
        let timestamp = Utc::now();
        self.series()
            .into_iter()
            .map(|(key, stats, _)| MetricValue {
                name: self.name.clone(),
                kind: MetricKind::Histogram,
                value: stats.sum,
                labels: self.schema.pairs(&key),
                timestamp,
            })
            .collect()
    }
}

/// Observes elapsed seconds into a histogram on drop.
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    labels: Vec<String>,
    started: Instant,
    observed: bool,
}

impl HistogramTimer<'_> {
    /// Observe now and return the elapsed seconds.
    pub fn observe_duration(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if !self.observed {
            self.observed = true;
            let labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
            let _ = self.histogram.observe(elapsed, &labels);
        }
        elapsed
    }
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.record();
    }
}
