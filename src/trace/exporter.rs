//! Finished-span exporters.

use serde_json::Value;

use super::span::Span;
use crate::logging::Logger;

/// Receives every span once it finishes.
///
/// Called synchronously on the thread that finished the span, so
/// implementations should hand work off rather than block.
pub trait SpanExporter: Send + Sync {
    fn name(&self) -> &str;

    fn export(&self, span: &Span);
}

/// Exporter backed by a closure.
pub struct FnExporter<F> {
    name: String,
    f: F,
}

impl<F> FnExporter<F>
where
    F: Fn(&Span) + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> SpanExporter for FnExporter<F>
where
    F: Fn(&Span) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn export(&self, span: &Span) {
        (self.f)(span)
    }
}

/// Writes one debug record per finished span (errors at error level).
pub struct LogSpanExporter {
    logger: Logger,
}

impl LogSpanExporter {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl SpanExporter for LogSpanExporter {
    fn name(&self) -> &str {
        "log"
    }

    fn export(&self, span: &Span) {
        let fields = [
            ("trace_id", Value::from(span.trace_id.as_str())),
            ("span_id", Value::from(span.span_id.as_str())),
            ("operation", Value::from(span.operation_name.as_str())),
            ("status", Value::from(span.status.as_str())),
            ("duration_ms", Value::from(span.duration_ms.unwrap_or(0.0))),
        ];
        let message = format!("span {} finished", span.operation_name);
        if span.status.is_failure() {
            let mut fields = fields.to_vec();
            if let Some(error) = &span.error {
                fields.push(("error", Value::from(error.as_str())));
            }
            self.logger.error(&message, &fields);
        } else {
            self.logger.debug(&message, &fields);
        }
    }
}
