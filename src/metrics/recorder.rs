//! Bridge from the `metrics` facade into a [`MetricsCollector`].
//!
//! The first registration of a name fixes its label schema (label keys in
//! the order the macro call supplies them). Registrations that conflict
//! with an existing schema or kind get a no-op handle.

use std::collections::HashMap;
use std::sync::Arc;

use ::metrics::{
    CounterFn, GaugeFn, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use parking_lot::Mutex;

use super::collector::MetricsCollector;
use super::counter::Counter;
use super::gauge::Gauge;
use super::histogram::Histogram;

pub(crate) struct CollectorRecorder {
    collector: MetricsCollector,
    descriptions: Mutex<HashMap<String, String>>,
}

impl CollectorRecorder {
    pub(crate) fn new(collector: MetricsCollector) -> Self {
        Self {
            collector,
            descriptions: Mutex::new(HashMap::new()),
        }
    }

    fn describe(&self, key: KeyName, description: SharedString) {
        self.descriptions
            .lock()
            .insert(key.as_str().to_string(), String::from(&*description));
    }

    fn description_of(&self, name: &str) -> String {
        self.descriptions.lock().get(name).cloned().unwrap_or_default()
    }
}

fn split_labels(key: &Key) -> (Vec<String>, Vec<String>) {
    key.labels()
        .map(|l| (l.key().to_string(), l.value().to_string()))
        .unzip()
}

fn as_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

impl Recorder for CollectorRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> ::metrics::Counter {
        let (names, values) = split_labels(key);
        let description = self.description_of(key.name());
        match self.collector.counter(key.name(), &description, &as_refs(&names)) {
            Ok(counter) => ::metrics::Counter::from_arc(Arc::new(BoundCounter { counter, values })),
            Err(err) => {
                tracing::warn!(metric = key.name(), error = %err, "facade counter rejected");
                ::metrics::Counter::noop()
            }
        }
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> ::metrics::Gauge {
        let (names, values) = split_labels(key);
        let description = self.description_of(key.name());
        match self.collector.gauge(key.name(), &description, &as_refs(&names)) {
            Ok(gauge) => ::metrics::Gauge::from_arc(Arc::new(BoundGauge { gauge, values })),
            Err(err) => {
                tracing::warn!(metric = key.name(), error = %err, "facade gauge rejected");
                ::metrics::Gauge::noop()
            }
        }
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> ::metrics::Histogram {
        let (names, values) = split_labels(key);
        let description = self.description_of(key.name());
        match self
            .collector
            .histogram(key.name(), &description, &as_refs(&names), None)
        {
            Ok(histogram) => {
                ::metrics::Histogram::from_arc(Arc::new(BoundHistogram { histogram, values }))
            }
            Err(err) => {
                tracing::warn!(metric = key.name(), error = %err, "facade histogram rejected");
                ::metrics::Histogram::noop()
            }
        }
    }
}

struct BoundCounter {
    counter: Arc<Counter>,
    values: Vec<String>,
}

impl CounterFn for BoundCounter {
    fn increment(&self, value: u64) {
        let _ = self.counter.inc(value as f64, &as_refs(&self.values));
    }

    fn absolute(&self, value: u64) {
        let _ = self.counter.absolute(value as f64, &as_refs(&self.values));
    }
}

struct BoundGauge {
    gauge: Arc<Gauge>,
    values: Vec<String>,
}

impl GaugeFn for BoundGauge {
    fn increment(&self, value: f64) {
        let _ = self.gauge.inc(value, &as_refs(&self.values));
    }

    fn decrement(&self, value: f64) {
        let _ = self.gauge.dec(value, &as_refs(&self.values));
    }

    fn set(&self, value: f64) {
        let _ = self.gauge.set(value, &as_refs(&self.values));
    }
}

struct BoundHistogram {
    histogram: Arc<Histogram>,
    values: Vec<String>,
}

impl HistogramFn for BoundHistogram {
    fn record(&self, value: f64) {
        let _ = self.histogram.observe(value, &as_refs(&self.values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_macros_feed_collector() {
        let collector = MetricsCollector::default();
        let recorder = CollectorRecorder::new(collector.clone());

        ::metrics::with_local_recorder(&recorder, || {
            ::metrics::describe_counter!("facade_requests_total", "Requests via facade");
            ::metrics::counter!("facade_requests_total", "method" => "GET").increment(3);
            ::metrics::gauge!("facade_inflight").set(4.0);
            ::metrics::histogram!("facade_latency").record(0.5);
        });

        let counter = collector
            .counter("facade_requests_total", "", &["method"])
            .unwrap();
        assert_eq!(counter.get(&["GET"]).unwrap(), 3.0);
        assert_eq!(counter.description(), "Requests via facade");
        let gauge = collector.gauge("facade_inflight", "", &[]).unwrap();
        assert_eq!(gauge.get(&[]).unwrap(), 4.0);
        let histogram = collector.histogram("facade_latency", "", &[], None).unwrap();
        assert_eq!(histogram.get_stats(&[]).unwrap().count, 1);
    }
}
