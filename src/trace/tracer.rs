//! Span lifecycle, ambient context, and finished-span retention.
//!
//! A span is Open from `start_span` until its handle is dropped (or
//! `finish` is called), then Finished: stamped with end time, duration, and
//! status, handed to every exporter, and appended to a fixed-capacity ring
//! buffer.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::TraceContext;
use super::exporter::SpanExporter;
use super::span::{millis_between, Span, SpanLog, SpanStatus};
use crate::ambient;
use crate::metrics::HistogramStats;

/// Tracer configuration.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Service name stamped on every span.
    pub service_name: String,
    /// Finished spans retained in memory (oldest evicted first).
    pub max_spans: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service_name: "app".to_string(),
            max_spans: 10_000,
        }
    }
}

/// Per-operation aggregate over the retained window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
}

/// Error rate and duration distribution over the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub total_spans: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub duration_ms: HistogramStats,
    pub operations: BTreeMap<String, OperationStats>,
}

struct TracerInner {
    config: TracerConfig,
    finished: Mutex<VecDeque<Span>>,
    exporters: RwLock<Vec<Arc<dyn SpanExporter>>>,
}

/// Creates spans and retains finished ones. Cheap to clone.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Self {
        let max_spans = config.max_spans.max(1);
        Self {
            inner: Arc::new(TracerInner {
                config: TracerConfig { max_spans, ..config },
                finished: Mutex::new(VecDeque::with_capacity(max_spans.min(1024))),
                exporters: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.config.service_name
    }

    pub fn add_exporter(&self, exporter: Arc<dyn SpanExporter>) {
        self.inner.exporters.write().push(exporter);
    }

    /// Open a span and make it the ambient context until the handle drops.
    ///
    /// The parent is `parent` if given, otherwise the ambient context; a
    /// span without either starts a new trace.
    pub fn start_span(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        tags: &[(&str, Value)],
    ) -> ActiveSpan {
        let recorder = self.open(operation_name, parent, tags);
        let depth = ambient::push_trace_context(recorder.context());
        ActiveSpan {
            recorder,
            depth,
            _not_send: PhantomData,
        }
    }

    /// Run `f` inside a span. An `Err` is recorded on the span and returned
    /// unchanged.
    pub fn trace<T, E, F>(&self, operation_name: &str, tags: &[(&str, Value)], f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let mut span = self.start_span(operation_name, None, tags);
        let result = f();
        if let Err(e) = &result {
            span.set_error(e.to_string());
        }
        result
    }

    /// Run `fut` inside a span. The span's context is ambient only while
    /// `fut` is being polled, so the returned future may move between
    /// threads.
    pub async fn trace_async<T, E, F>(
        &self,
        operation_name: &str,
        tags: &[(&str, Value)],
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let parent = ambient::current_trace_context();
        let mut recorder = self.open(operation_name, parent.as_ref(), tags);
        recorder.abandoned_error = Some("cancelled".to_string());
        let result = ambient::with_trace_context(recorder.context(), fut).await;
        if let Err(e) = &result {
            recorder.fail(e.to_string());
        }
        recorder.finish();
        result
    }

    /// The most recent `limit` finished spans, oldest first, optionally
    /// restricted to one trace.
    pub fn get_traces(&self, trace_id: Option<&str>, limit: usize) -> Vec<Span> {
        let finished = self.inner.finished.lock();
        let mut spans: Vec<Span> = finished
            .iter()
            .rev()
            .filter(|s| trace_id.map_or(true, |id| s.trace_id == id))
            .take(limit)
            .cloned()
            .collect();
        spans.reverse();
        spans
    }

    pub fn get_stats(&self) -> TraceStats {
        let (durations, operations, errors) = {
            let finished = self.inner.finished.lock();
            let mut durations = Vec::with_capacity(finished.len());
            let mut operations: BTreeMap<String, (OperationStats, f64)> = BTreeMap::new();
            let mut errors = 0u64;
            for span in finished.iter() {
                let duration = span.duration_ms.unwrap_or(0.0);
                durations.push(duration);
                let entry = operations.entry(span.operation_name.clone()).or_default();
                entry.0.count += 1;
                entry.1 += duration;
                if span.status.is_failure() {
                    entry.0.errors += 1;
                    errors += 1;
                }
            }
            (durations, operations, errors)
        };

        let total = durations.len() as u64;
        TraceStats {
            total_spans: total,
            error_count: errors,
            error_rate: if total == 0 { 0.0 } else { errors as f64 / total as f64 },
            duration_ms: HistogramStats::from_samples(&durations),
            operations: operations
                .into_iter()
                .map(|(name, (mut stats, sum))| {
                    stats.avg_duration_ms = sum / stats.count as f64;
                    (name, stats)
                })
                .collect(),
        }
    }

    /// Drop every retained span.
    pub fn clear(&self) {
        self.inner.finished.lock().clear();
    }

    fn open(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        tags: &[(&str, Value)],
    ) -> SpanRecorder {
        let context = match parent {
            Some(parent) => parent.child(),
            None => match ambient::current_trace_context() {
                Some(current) => current.child(),
                None => TraceContext::new_root(),
            },
        };

        let span = Span {
            trace_id: context.trace_id.clone(),
            span_id: context.span_id.clone(),
            parent_span_id: context.parent_span_id.clone(),
            operation_name: operation_name.to_string(),
            service_name: self.inner.config.service_name.clone(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: SpanStatus::Ok,
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            logs: Vec::new(),
            error: None,
        };

        SpanRecorder {
            span: Some(span),
            baggage: context.baggage,
            started: Instant::now(),
            tracer: self.clone(),
            abandoned_error: None,
        }
    }

    fn record(&self, span: Span) {
        let exporters = self.inner.exporters.read().clone();
        for exporter in exporters {
            if catch_unwind(AssertUnwindSafe(|| exporter.export(&span))).is_err() {
                tracing::warn!(exporter = exporter.name(), "span exporter panicked");
            }
        }

        let mut finished = self.inner.finished.lock();
        if finished.len() >= self.inner.config.max_spans {
            finished.pop_front();
        }
        finished.push_back(span);
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

/// Owns an open span until it is finished.
struct SpanRecorder {
    span: Option<Span>,
    baggage: BTreeMap<String, String>,
    started: Instant,
    tracer: Tracer,
    /// Error recorded if the recorder is dropped before `finish`.
    abandoned_error: Option<String>,
}

impl SpanRecorder {
    fn context(&self) -> TraceContext {
        match &self.span {
            Some(span) => TraceContext {
                trace_id: span.trace_id.clone(),
                span_id: span.span_id.clone(),
                parent_span_id: span.parent_span_id.clone(),
                baggage: self.baggage.clone(),
            },
            None => TraceContext::new_root(),
        }
    }

    fn span_mut(&mut self) -> Option<&mut Span> {
        self.span.as_mut()
    }

    fn fail(&mut self, message: String) {
        if let Some(span) = self.span_mut() {
            span.status = SpanStatus::Error;
            span.error = Some(message);
        }
    }

    fn finish(&mut self) {
        let Some(mut span) = self.span.take() else {
            return;
        };
        // Derived from the monotonic clock so end >= start always holds.
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let end = span
            .start_time
            .checked_add_signed(elapsed)
            .unwrap_or(span.start_time);
        span.end_time = Some(end);
        span.duration_ms = Some(millis_between(span.start_time, end));
        self.tracer.record(span);
    }
}

impl Drop for SpanRecorder {
    fn drop(&mut self) {
        if self.span.is_none() {
            return;
        }
        if std::thread::panicking() {
            self.fail("panicked".to_string());
        } else if let Some(error) = self.abandoned_error.take() {
            self.fail(error);
        }
        self.finish();
    }
}

/// Handle to an open span that is the ambient context on this thread.
///
/// Dropping the handle finishes the span and removes its context from the
/// ambient stack; spans still open keep theirs, whatever the drop order. A panic unwinding through the
/// handle marks the span as failed.
pub struct ActiveSpan {
    recorder: SpanRecorder,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ActiveSpan {
    pub fn context(&self) -> TraceContext {
        self.recorder.context()
    }

    pub fn trace_id(&self) -> &str {
        self.recorder.span.as_ref().map_or("", |s| s.trace_id.as_str())
    }

    pub fn span_id(&self) -> &str {
        self.recorder.span.as_ref().map_or("", |s| s.span_id.as_str())
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(span) = self.recorder.span_mut() {
            span.tags.insert(key.into(), value.into());
        }
    }

    pub fn log(&mut self, message: impl Into<String>, fields: &[(&str, Value)]) {
        if let Some(span) = self.recorder.span_mut() {
            span.logs.push(SpanLog {
                timestamp: Utc::now(),
                message: message.into(),
                fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            });
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(span) = self.recorder.span_mut() {
            span.status = status;
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.recorder.fail(message.into());
    }

    /// Finish now instead of at end of scope.
    pub fn finish(self) {}
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.recorder.fail("panicked".to_string());
        }
        let span_id = self.span_id().to_string();
        self.recorder.finish();
        ambient::pop_trace_context(self.depth, &span_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracer(max_spans: usize) -> Tracer {
        Tracer::new(TracerConfig {
            service_name: "test".to_string(),
            max_spans,
        })
    }

    #[test]
    fn test_root_span_mints_trace() {
        let tracer = tracer(10);
        {
            let span = tracer.start_span("root", None, &[]);
            assert_eq!(span.trace_id().len(), 32);
        }
        let spans = tracer.get_traces(None, 10);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_root());
        assert_eq!(spans[0].service_name, "test");
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let tracer = tracer(3);
        for i in 0..5 {
            let _span = tracer.start_span(&format!("op{}", i), None, &[]);
        }
        let names: Vec<_> = tracer
            .get_traces(None, 10)
            .into_iter()
            .map(|s| s.operation_name)
            .collect();
        assert_eq!(names, vec!["op2", "op3", "op4"]);
    }

    #[test]
    fn test_explicit_parent_wins_over_ambient() {
        let tracer = tracer(10);
        let remote = TraceContext::new_root();
        let _outer = tracer.start_span("outer", None, &[]);
        let inner = tracer.start_span("inner", Some(&remote), &[]);
        assert_eq!(inner.trace_id(), remote.trace_id);
    }

    #[test]
    fn test_panic_marks_span_failed() {
        let tracer = tracer(10);
        let t = tracer.clone();
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _span = t.start_span("boom", None, &[]);
            panic!("kaboom");
        }));
        assert!(result.is_err());
        let spans = tracer.get_traces(None, 1);
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].error.as_deref(), Some("panicked"));
        assert!(ambient::current_trace_context().is_none());
    }

    #[test]
    fn test_stats_empty() {
        let stats = tracer(10).get_stats();
        assert_eq!(stats.total_spans, 0);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.duration_ms.count, 0);
    }
}
