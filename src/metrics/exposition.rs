//! Prometheus text exposition and the JSON metrics snapshot.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use super::collector::Metric;
use super::histogram::HistogramStats;
use super::value::MetricValue;

/// Point-in-time view of every registered metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub counters: BTreeMap<String, Vec<MetricValue>>,
    pub gauges: BTreeMap<String, Vec<MetricValue>>,
    /// Metric name -> rendered label key -> stats.
    pub histograms: BTreeMap<String, BTreeMap<String, HistogramStats>>,
}

impl MetricsSnapshot {
    pub(crate) fn build(uptime_seconds: f64, metrics: &[Metric]) -> Self {
        let mut snapshot = Self {
            uptime_seconds,
            counters: BTreeMap::new(),
            gauges: BTreeMap::new(),
            histograms: BTreeMap::new(),
        };
        for metric in metrics {
            match metric {
                Metric::Counter(c) => {
                    snapshot.counters.insert(c.name().to_string(), c.collect());
                }
                Metric::Gauge(g) => {
                    snapshot.gauges.insert(g.name().to_string(), g.collect());
                }
                Metric::Histogram(h) => {
                    let series = h
                        .series()
                        .into_iter()
                        .map(|(key, stats, _)| (h.schema().render_key(&key), stats))
                        .collect();
                    snapshot.histograms.insert(h.name().to_string(), series);
                }
            }
        }
        snapshot
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Render metrics in registration order.
pub(crate) fn render_prometheus(metrics: &[Metric]) -> String {
    let mut out = String::new();
    for metric in metrics {
        let name = metric.name();
        let _ = writeln!(out, "# HELP {} {}", name, escape_help(metric.description()));
        let _ = writeln!(out, "# TYPE {} {}", name, metric.kind());

        match metric {
            Metric::Counter(c) => {
                for (key, value) in c.series() {
                    let labels = c.schema().render_prometheus(&key, None);
                    let _ = writeln!(out, "{}{} {}", name, labels, format_value(value));
                }
            }
            Metric::Gauge(g) => {
                for (key, value) in g.series() {
                    let labels = g.schema().render_prometheus(&key, None);
                    let _ = writeln!(out, "{}{} {}", name, labels, format_value(value));
                }
            }
            Metric::Histogram(h) => {
                let schema = h.schema();
                for (key, stats, cumulative) in h.series() {
                    for (bound, count) in h.buckets().iter().zip(cumulative) {
                        let le = format_value(*bound);
                        let labels = schema.render_prometheus(&key, Some(("le", le.as_str())));
                        let _ = writeln!(out, "{}_bucket{} {}", name, labels, count);
                    }
                    let labels = schema.render_prometheus(&key, Some(("le", "+Inf")));
                    let _ = writeln!(out, "{}_bucket{} {}", name, labels, stats.count);
                    let labels = schema.render_prometheus(&key, None);
                    let _ = writeln!(out, "{}_count{} {}", name, labels, stats.count);
                    let _ = writeln!(out, "{}_sum{} {}", name, labels, format_value(stats.sum));
                }
            }
        }
    }
    out
}

/// Integral values render without a fractional part.
pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
