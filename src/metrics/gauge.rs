//! Gauges: values that go up and down.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use parking_lot::Mutex;

use super::error::{report, MetricError};
use super::labels::{LabelKey, LabelSchema};
use super::value::{MetricKind, MetricValue};

/// A current value per label combination.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    description: String,
    schema: LabelSchema,
    values: Mutex<BTreeMap<LabelKey, f64>>,
    warned: AtomicBool,
}

impl Gauge {
    pub(crate) fn new(name: &str, description: &str, labels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema: LabelSchema::new(labels),
            values: Mutex::new(BTreeMap::new()),
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

    pub fn set(&self, value: f64, labels: &[&str]) -> Result<(), MetricError> {
        let key = self.key(labels)?;
        self.values.lock().insert(key, value);
        Ok(())
    }

    pub fn inc(&self, delta: f64, labels: &[&str]) -> Result<(), MetricError> {
        let key = self.key(labels)?;
        *self.values.lock().entry(key).or_insert(0.0) += delta;
        Ok(())
    }

    pub fn dec(&self, delta: f64, labels: &[&str]) -> Result<(), MetricError> {
        self.inc(-delta, labels)
    }

    /// Current value for `labels`; zero for an unseen combination.
    pub fn get(&self, labels: &[&str]) -> Result<f64, MetricError> {
        let key = self.schema.key(&self.name, labels)?;
        Ok(self.values.lock().get(&key).copied().unwrap_or(0.0))
    }

    pub(crate) fn series(&self) -> Vec<(LabelKey, f64)> {
        self.values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn collect(&self) -> Vec<MetricValue> {
        let timestamp = Utc::now();
        self.series()
            .into_iter()
            .map(|(key, value)| MetricValue {
                name: self.name.clone(),
                kind: MetricKind::Gauge,
                value,
                labels: self.schema.pairs(&key),
                timestamp,
            })
            .collect()
    }

    fn key(&self, labels: &[&str]) -> Result<LabelKey, MetricError> {
        self.schema.key(&self.name, labels).map_err(|err| {
            report(&err, &self.warned);
            err
        })
    }
}
