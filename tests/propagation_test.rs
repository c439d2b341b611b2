//! Ambient trace context and log fields across async tasks.

use std::time::Duration;

use serde_json::json;
use telemetry_core::ambient::{self, current_trace_context};
use telemetry_core::logging::{get_context, set_context, with_log_context};
use telemetry_core::trace::{TraceContext, Tracer};

// =============================================================================
// Task Isolation
// =============================================================================

#[tokio::test(flavor = "current_thread")]
async fn concurrent_tasks_keep_their_own_trace() {
    let tracer = Tracer::default();
    let mut handles = Vec::new();

    for i in 0..10 {
        let tracer = tracer.clone();
        handles.push(tokio::spawn(async move {
            let result: Result<(String, String), String> = tracer
                .trace_async("request", &[], async {
                    let mine = current_trace_context().map(|c| c.trace_id);
                    tokio::time::sleep(Duration::from_millis(5 * (10 - i))).await;
                    let after = current_trace_context().map(|c| c.trace_id);
                    match (mine, after) {
                        (Some(a), Some(b)) => Ok((a, b)),
                        _ => Err("no ambient trace".to_string()),
                    }
                })
                .await;
            result
        }));
    }

    let mut seen = std::collections::HashSet::new();
    for handle in handles {
        let (before, after) = handle.await.unwrap().unwrap();
        assert_eq!(before, after);
        assert!(seen.insert(before));
    }
    assert!(current_trace_context().is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn nested_async_spans_share_trace() {
    let tracer = Tracer::default();
    let inner_tracer = tracer.clone();
    let result: Result<(), String> = tracer
        .trace_async("outer", &[], async move {
            tokio::task::yield_now().await;
            inner_tracer
                .trace_async("inner", &[], async {
                    tokio::task::yield_now().await;
                    Ok::<(), String>(())
                })
                .await
        })
        .await;
    assert!(result.is_ok());

    let spans = tracer.get_traces(None, 10);
    assert_eq!(spans.len(), 2);
    let (inner, outer) = (&spans[0], &spans[1]);
    assert_eq!(inner.trace_id, outer.trace_id);
    assert_eq!(inner.parent_span_id.as_deref(), Some(outer.span_id.as_str()));
}

#[tokio::test(flavor = "current_thread")]
async fn async_error_marks_span() {
    let tracer = Tracer::default();
    let result: Result<(), String> = tracer
        .trace_async("fetch", &[], async { Err("upstream 503".to_string()) })
        .await;
    assert_eq!(result, Err("upstream 503".to_string()));
    let span = &tracer.get_traces(None, 1)[0];
    assert_eq!(span.error.as_deref(), Some("upstream 503"));
}

#[tokio::test(flavor = "current_thread")]
async fn dropped_future_marks_span_cancelled() {
    let tracer = Tracer::default();
    let slow = tracer.trace_async("slow", &[], async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<(), String>(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
    assert!(timed_out.is_err());

    let span = &tracer.get_traces(None, 1)[0];
    assert_eq!(span.error.as_deref(), Some("cancelled"));
}

// =============================================================================
// Inbound Context
// =============================================================================

#[tokio::test]
async fn spans_continue_an_inbound_trace() {
    let tracer = Tracer::default();
    let inbound = TraceContext::from_headers(vec![
        ("x-trace-id", "4bf92f3577b34da6a3ce929d0e0e4736"),
        ("x-span-id", "00f067aa0ba902b7"),
    ])
    .unwrap();

    let handler_tracer = tracer.clone();
    let result: Result<(), String> = ambient::with_trace_context(inbound.clone(), async move {
        handler_tracer
            .trace_async("handle", &[], async { Ok(()) })
            .await
    })
    .await;
    assert!(result.is_ok());

    let span = &tracer.get_traces(None, 1)[0];
    assert_eq!(span.trace_id, inbound.trace_id);
    assert_eq!(span.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));
}

// =============================================================================
// Log Field Bag
// =============================================================================

#[tokio::test(flavor = "current_thread")]
async fn log_context_is_per_task() {
    let a = tokio::spawn(with_log_context(&[("request_id", json!("a"))], async {
        tokio::task::yield_now().await;
        set_context("step", 1);
        tokio::task::yield_now().await;
        get_context()
    }));
    let b = tokio::spawn(with_log_context(&[("request_id", json!("b"))], async {
        tokio::task::yield_now().await;
        get_context()
    }));

    let a = a.await.unwrap();
    let b = b.await.unwrap();
    assert_eq!(a.get("request_id"), Some(&json!("a")));
    assert_eq!(a.get("step"), Some(&json!(1)));
    assert_eq!(b.get("request_id"), Some(&json!("b")));
    assert!(b.get("step").is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn propagate_copies_caller_state() {
    let tracer = Tracer::default();
    let span = tracer.start_span("parent", None, &[]);
    let expected = span.trace_id().to_string();
    let task = tokio::spawn(ambient::propagate(async {
        current_trace_context().map(|c| c.trace_id)
    }));
    drop(span);
    assert_eq!(task.await.unwrap(), Some(expected));
}
