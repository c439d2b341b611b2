//! Ambient per-task state for trace correlation.
//!
//! Holds the active trace-context stack and the log field bag for the
//! logical request currently running on this thread. Synchronous scopes
//! (span handles) push and pop the stack directly. Asynchronous tasks carry
//! their own [`Ambient`] inside a [`Scoped`] future, which swaps it into the
//! thread slot for the duration of each poll, so tasks that share a worker
//! thread never observe each other's trace id or fields.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{Map, Value};

use crate::trace::TraceContext;

/// Ambient state of one logical request.
#[derive(Debug, Clone, Default)]
pub struct Ambient {
    trace_stack: Vec<TraceContext>,
    fields: Map<String, Value>,
}

thread_local! {
    static AMBIENT: RefCell<Ambient> = RefCell::new(Ambient::default());
}

impl Ambient {
    /// Snapshot the ambient state of the current thread.
    pub fn capture() -> Self {
        AMBIENT.with(|slot| slot.borrow().clone())
    }

    /// Push `ctx` as the innermost active trace context.
    pub fn with_trace_context(mut self, ctx: TraceContext) -> Self {
        self.trace_stack.push(ctx);
        self
    }

    /// Add a log field inherited by every record emitted under this state.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.trace_stack.last()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// The innermost trace context active on this thread, if any.
pub fn current_trace_context() -> Option<TraceContext> {
    AMBIENT.with(|slot| slot.borrow().trace_stack.last().cloned())
}

/// Push a context and return the stack depth to restore on exit.
pub(crate) fn push_trace_context(ctx: TraceContext) -> usize {
    AMBIENT.with(|slot| {
        let mut ambient = slot.borrow_mut();
        let depth = ambient.trace_stack.len();
        ambient.trace_stack.push(ctx);
        depth
    })
}

/// Remove the context for `span_id` pushed at `depth`. Contexts pushed
/// above it stay in place, so handles may be dropped out of order.
pub(crate) fn pop_trace_context(depth: usize, span_id: &str) {
    AMBIENT.with(|slot| {
        let mut ambient = slot.borrow_mut();
        let stack = &mut ambient.trace_stack;
        let index = match stack.get(depth) {
            Some(ctx) if ctx.span_id == span_id => Some(depth),
            _ => stack.iter().rposition(|ctx| ctx.span_id == span_id),
        };
        if let Some(index) = index {
            stack.remove(index);
        }
    });
}

pub(crate) fn set_field(key: String, value: Value) {
    AMBIENT.with(|slot| {
        slot.borrow_mut().fields.insert(key, value);
    });
}

pub(crate) fn fields() -> Map<String, Value> {
    AMBIENT.with(|slot| slot.borrow().fields.clone())
}

pub(crate) fn clear_fields() {
    AMBIENT.with(|slot| slot.borrow_mut().fields.clear());
}

/// Run `fut` with a copy of the caller's ambient state.
pub fn propagate<F: Future>(fut: F) -> Scoped<F> {
    Scoped::new(Ambient::capture(), fut)
}

/// Run `fut` with the caller's ambient state plus `ctx` as the active context.
///
/// Use this to continue a trace whose context arrived from another process.
pub fn with_trace_context<F: Future>(ctx: TraceContext, fut: F) -> Scoped<F> {
    Scoped::new(Ambient::capture().with_trace_context(ctx), fut)
}

/// A future that runs with its own ambient state installed.
pub struct Scoped<F> {
    inner: Pin<Box<F>>,
    ambient: Option<Ambient>,
}

impl<F: Future> Scoped<F> {
    pub fn new(ambient: Ambient, fut: F) -> Self {
        Self {
            inner: Box::pin(fut),
            ambient: Some(ambient),
        }
    }
}

/// Restores the outer ambient state even if the inner poll unwinds.
struct SwapBack<'a> {
    slot: &'a mut Option<Ambient>,
    outer: Option<Ambient>,
}

impl Drop for SwapBack<'_> {
    fn drop(&mut self) {
        let outer = self.outer.take().unwrap_or_default();
        let mine = AMBIENT.with(|slot| slot.replace(outer));
        *self.slot = Some(mine);
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mine = this.ambient.take().unwrap_or_default();
        let outer = AMBIENT.with(|slot| slot.replace(mine));
        let _swap = SwapBack {
            slot: &mut this.ambient,
            outer: Some(outer),
        };
        this.inner.as_mut().poll(cx)
    }
}
