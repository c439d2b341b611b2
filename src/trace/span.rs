//! Finished-span data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Ok,
    Error,
    Timeout,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// A timestamped event recorded on a span while it was open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub fields: BTreeMap<String, Value>,
}

/// One timed operation within a trace.
///
/// Mutable only through an open span handle; once finished it is handed to
/// exporters and the retention buffer as an immutable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub service_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub status: SpanStatus,
    pub tags: BTreeMap<String, Value>,
    pub logs: Vec<SpanLog>,
    pub error: Option<String>,
}

impl Span {
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Exact elapsed time between start and end in milliseconds.
    pub fn elapsed_ms(&self) -> Option<f64> {
        let end = self.end_time?;
        Some(millis_between(self.start_time, end))
    }
}

pub(crate) fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64,
    }
}
