//! Trace context and cross-process propagation headers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{is_hex_id, new_span_id, new_trace_id};

pub const TRACE_ID_HEADER: &str = "X-Trace-ID";
pub const SPAN_ID_HEADER: &str = "X-Span-ID";
pub const PARENT_SPAN_ID_HEADER: &str = "X-Parent-Span-ID";
pub const BAGGAGE_HEADER_PREFIX: &str = "X-Baggage-";

/// Errors raised while parsing propagation headers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("Missing propagation header: {0}")]
    MissingHeader(&'static str),
    #[error("Malformed propagation header {header}: {value}")]
    MalformedHeader { header: &'static str, value: String },
}

/// Identity of the currently active span plus propagated baggage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub baggage: BTreeMap<String, String>,
}

impl TraceContext {
    /// Context for a new root span with fresh ids.
    pub fn new_root() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
            baggage: BTreeMap::new(),
        }
    }

    /// Context for a child of this span: same trace, fresh span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            baggage: self.baggage.clone(),
        }
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Serialize into outbound propagation headers.
    pub fn to_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (TRACE_ID_HEADER.to_string(), self.trace_id.clone()),
            (SPAN_ID_HEADER.to_string(), self.span_id.clone()),
        ];
        if let Some(parent) = &self.parent_span_id {
            headers.push((PARENT_SPAN_ID_HEADER.to_string(), parent.clone()));
        }
        for (key, value) in &self.baggage {
            headers.push((format!("{}{}", BAGGAGE_HEADER_PREFIX, key), value.clone()));
        }
        headers
    }

    /// Parse inbound propagation headers. Header names match case-insensitively.
    pub fn from_headers<I, K, V>(headers: I) -> Result<Self, TraceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut trace_id = None;
        let mut span_id = None;
        let mut parent_span_id = None;
        let mut baggage = BTreeMap::new();

        for (name, value) in headers {
            let name = name.as_ref();
            let value = value.as_ref().trim();
            if name.eq_ignore_ascii_case(TRACE_ID_HEADER) {
                trace_id = Some(checked(TRACE_ID_HEADER, value)?);
            } else if name.eq_ignore_ascii_case(SPAN_ID_HEADER) {
                span_id = Some(checked(SPAN_ID_HEADER, value)?);
            } else if name.eq_ignore_ascii_case(PARENT_SPAN_ID_HEADER) {
                if !value.is_empty() {
                    parent_span_id = Some(checked(PARENT_SPAN_ID_HEADER, value)?);
                }
            } else if let Some(key) = baggage_key(name) {
                baggage.insert(key, value.to_string());
            }
        }

        Ok(Self {
            trace_id: trace_id.ok_or(TraceError::MissingHeader(TRACE_ID_HEADER))?,
            span_id: span_id.ok_or(TraceError::MissingHeader(SPAN_ID_HEADER))?,
            parent_span_id,
            baggage,
        })
    }
}

fn baggage_key(name: &str) -> Option<String> {
    let prefix = name.get(..BAGGAGE_HEADER_PREFIX.len())?;
    let key = name.get(BAGGAGE_HEADER_PREFIX.len()..)?;
    if prefix.eq_ignore_ascii_case(BAGGAGE_HEADER_PREFIX) && !key.is_empty() {
        Some(key.to_ascii_lowercase())
    } else {
        None
    }
}

fn checked(header: &'static str, value: &str) -> Result<String, TraceError> {
    if is_hex_id(value) {
        Ok(value.to_ascii_lowercase())
    } else {
        Err(TraceError::MalformedHeader {
            header,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_keeps_trace_id() {
        let root = TraceContext::new_root().with_baggage("tenant", "acme");
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_ne!(child.span_id, root.span_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_eq!(child.baggage.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_headers_carry_all_fields() {
        let ctx = TraceContext::new_root().child().with_baggage("user", "42");
        let parsed = TraceContext::from_headers(ctx.to_headers()).unwrap();
        assert_eq!(parsed, ctx);
    }

    #[test]
    fn test_from_headers_case_insensitive() {
        let headers = [("x-trace-id", "ABCDEF01"), ("x-span-id", "0123")];
        let ctx = TraceContext::from_headers(headers).unwrap();
        assert_eq!(ctx.trace_id, "abcdef01");
        assert_eq!(ctx.span_id, "0123");
        assert!(ctx.parent_span_id.is_none());
    }

    #[test]
    fn test_from_headers_missing_trace_id() {
        let headers = [("X-Span-ID", "0123")];
        assert_eq!(
            TraceContext::from_headers(headers),
            Err(TraceError::MissingHeader(TRACE_ID_HEADER))
        );
    }

    #[test]
    fn test_from_headers_malformed() {
        let headers = [("X-Trace-ID", "zz-top"), ("X-Span-ID", "0123")];
        let err = TraceContext::from_headers(headers).unwrap_err();
        assert!(matches!(err, TraceError::MalformedHeader { header: TRACE_ID_HEADER, .. }));
    }
}
