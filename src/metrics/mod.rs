//! Counters, gauges, and histograms with Prometheus and JSON export.
//!
//! # Data Flow
//! ```text
//! MetricsCollector::counter/gauge/histogram  (idempotent registration)
//!     → Counter::inc / Gauge::set / Histogram::observe  (per-metric lock)
//!     → collect_all (JSON snapshot) / export_prometheus (text exposition)
//! ```
//!
//! Label names are declared once per metric; updates pass label values in
//! the same order and get a [`MetricError`] on arity mismatch.

mod collector;
mod counter;
mod error;
mod exposition;
mod gauge;
mod histogram;
mod labels;
mod recorder;
mod value;

pub use collector::{Metric, MetricsCollector, MetricsConfig};
pub use counter::Counter;
pub use error::MetricError;
pub use exposition::MetricsSnapshot;
pub use gauge::Gauge;
pub use histogram::{
    nearest_rank, Histogram, HistogramStats, HistogramTimer, DEFAULT_BUCKETS, DEFAULT_CAPACITY,
};
pub use labels::{LabelKey, LabelSchema};
pub use value::{MetricKind, MetricValue};
