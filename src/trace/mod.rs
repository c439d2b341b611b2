//! Distributed tracing: nested spans, ambient context, and propagation.

mod context;
mod exporter;
mod ids;
mod span;
mod tracer;

pub use context::{
    TraceContext, TraceError, BAGGAGE_HEADER_PREFIX, PARENT_SPAN_ID_HEADER, SPAN_ID_HEADER,
    TRACE_ID_HEADER,
};
pub use exporter::{FnExporter, LogSpanExporter, SpanExporter};
pub use ids::{new_span_id, new_trace_id};
pub use span::{Span, SpanLog, SpanStatus};
pub use tracer::{ActiveSpan, OperationStats, TraceStats, Tracer, TracerConfig};
