//! Metric error types.
//!
//! Only schema violations surface as errors; exports and snapshots never fail.

use thiserror::Error;

use super::value::MetricKind;

/// Errors returned by metric registration and hot-path updates.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    #[error("Label mismatch for {metric}: expected {expected} values, got {actual}")]
    LabelMismatch {
        metric: String,
        expected: usize,
        actual: usize,
    },

    #[error("Counter {metric} cannot decrease (delta {delta})")]
    NegativeDelta { metric: String, delta: f64 },

    #[error("Metric {name} already registered as a {existing}")]
    KindConflict { name: String, existing: MetricKind },

    #[error("Metric {name} already registered with labels [{existing}]")]
    SchemaConflict { name: String, existing: String },

    #[error("A global metrics recorder is already installed")]
    RecorderInstalled,
}

/// Log the first schema violation of a metric at warn, the rest at debug.
pub(crate) fn report(err: &MetricError, warned: &std::sync::atomic::AtomicBool) {
    use std::sync::atomic::Ordering;
    if !warned.swap(true, Ordering::Relaxed) {
        tracing::warn!(error = %err, "metric update rejected");
    } else {
        tracing::debug!(error = %err, "metric update rejected");
    }
}
