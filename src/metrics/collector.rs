//! Metric registry.
//!
//! Registration is idempotent: asking for an existing name returns the same
//! underlying metric. Each metric guards its own series with its own lock,
//! so the registry lock is only taken to register and to export.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::counter::Counter;
use super::error::MetricError;
use super::exposition::{self, MetricsSnapshot};
use super::gauge::Gauge;
use super::histogram::{Histogram, DEFAULT_CAPACITY};
use super::labels::LabelSchema;
use super::recorder::CollectorRecorder;
use super::value::{MetricKind, MetricValue};

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Samples retained per histogram series.
    pub histogram_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// A registered metric of any kind.
#[derive(Clone)]
pub enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Self::Counter(m) => m.name(),
            Self::Gauge(m) => m.name(),
            Self::Histogram(m) => m.name(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Histogram(_) => MetricKind::Histogram,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Counter(m) => m.description(),
            Self::Gauge(m) => m.description(),
            Self::Histogram(m) => m.description(),
        }
    }

    pub fn schema(&self) -> &LabelSchema {
        match self {
            Self::Counter(m) => m.schema(),
            Self::Gauge(m) => m.schema(),
            Self::Histogram(m) => m.schema(),
        }
    }

    pub fn collect(&self) -> Vec<MetricValue> {
        match self {
            Self::Counter(m) => m.collect(),
            Self::Gauge(m) => m.collect(),
            Self::Histogram(m) => m.collect(),
        }
    }
}

struct CollectorInner {
    config: MetricsConfig,
    started: Instant,
    registry: Mutex<Vec<Metric>>,
}

/// Owns counter, gauge, and histogram registries. Cheap to clone.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<CollectorInner>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                config,
                started: Instant::now(),
                registry: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn counter(
        &self,
        name: &str,
        description: &str,
        labels: &[&str],
    ) -> Result<Arc<Counter>, MetricError> {
        let mut registry = self.inner.registry.lock();
        match lookup(&registry, name, labels)? {
            Some(Metric::Counter(existing)) => Ok(existing),
            Some(other) => Err(kind_conflict(&other)),
            None => {
                let counter = Arc::new(Counter::new(name, description, labels));
                registry.push(Metric::Counter(counter.clone()));
                Ok(counter)
            }
        }
    }

    pub fn gauge(
        &self,
        name: &str,
        description: &str,
        labels: &[&str],
    ) -> Result<Arc<Gauge>, MetricError> {
        let mut registry = self.inner.registry.lock();
        match lookup(&registry, name, labels)? {
            Some(Metric::Gauge(existing)) => Ok(existing),
            Some(other) => Err(kind_conflict(&other)),
            None => {
                let gauge = Arc::new(Gauge::new(name, description, labels));
                registry.push(Metric::Gauge(gauge.clone()));
                Ok(gauge)
            }
        }
    }

    /// Register a histogram. `buckets` defaults to
    /// [`DEFAULT_BUCKETS`](super::histogram::DEFAULT_BUCKETS) and is ignored
    /// when the name already exists.
    pub fn histogram(
        &self,
        name: &str,
        description: &str,
        labels: &[&str],
        buckets: Option<&[f64]>,
    ) -> Result<Arc<Histogram>, MetricError> {
        let mut registry = self.inner.registry.lock();
        match lookup(&registry, name, labels)? {
            Some(Metric::Histogram(existing)) => Ok(existing),
            Some(other) => Err(kind_conflict(&other)),
            None => {
                let histogram = Arc::new(Histogram::new(
                    name,
                    description,
                    labels,
                    buckets,
                    self.inner.config.histogram_capacity,
                ));
                registry.push(Metric::Histogram(histogram.clone()));
                Ok(histogram)
            }
        }
    }

    /// Registered metrics in registration order.
    pub fn metrics(&self) -> Vec<Metric> {
        self.inner.registry.lock().clone()
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.inner.started.elapsed().as_secs_f64()
    }

    /// Every series as a value, in registration order.
    pub fn collect(&self) -> Vec<MetricValue> {
        self.metrics().iter().flat_map(Metric::collect).collect()
    }

    pub fn collect_all(&self) -> MetricsSnapshot {
        MetricsSnapshot::build(self.uptime_seconds(), &self.metrics())
    }

    /// Prometheus text exposition of every registered metric.
    pub fn export_prometheus(&self) -> String {
        exposition::render_prometheus(&self.metrics())
    }

    /// Route the `metrics` facade macros into this collector.
    pub fn install_recorder(&self) -> Result<(), MetricError> {
        ::metrics::set_global_recorder(CollectorRecorder::new(self.clone()))
            .map_err(|_| MetricError::RecorderInstalled)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

fn lookup(registry: &[Metric], name: &str, labels: &[&str]) -> Result<Option<Metric>, MetricError> {
    let Some(existing) = registry.iter().find(|m| m.name() == name) else {
        return Ok(None);
    };
    if existing.schema() != &LabelSchema::new(labels) {
        return Err(MetricError::SchemaConflict {
            name: name.to_string(),
            existing: existing.schema().describe(),
        });
    }
    Ok(Some(existing.clone()))
}

fn kind_conflict(existing: &Metric) -> MetricError {
    MetricError::KindConflict {
        name: existing.name().to_string(),
        existing: existing.kind(),
    }
}
