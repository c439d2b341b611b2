//! Label schemas and label-combination keys.
//!
//! A metric declares its label names once at creation. Every update passes
//! an ordered slice of values matching that schema; the owned values form
//! the key of the series' accumulator.

use std::collections::BTreeMap;
use std::fmt::Write;

use super::error::MetricError;

/// Owned label values in schema order.
pub type LabelKey = Vec<String>;

/// Label names declared at metric creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    names: Vec<String>,
}

impl LabelSchema {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Validate `values` against the schema and build the series key.
    pub fn key(&self, metric: &str, values: &[&str]) -> Result<LabelKey, MetricError> {
        if values.len() != self.names.len() {
            return Err(MetricError::LabelMismatch {
                metric: metric.to_string(),
                expected: self.names.len(),
                actual: values.len(),
            });
        }
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    /// Name/value pairs for a key.
    pub fn pairs(&self, key: &LabelKey) -> BTreeMap<String, String> {
        self.names.iter().cloned().zip(key.iter().cloned()).collect()
    }

    /// `{name="value",...}` exposition form, with an optional trailing pair.
    pub fn render_prometheus(&self, key: &LabelKey, extra: Option<(&str, &str)>) -> String {
        let mut pairs: Vec<(&str, &str)> = self
            .names
            .iter()
            .map(String::as_str)
            .zip(key.iter().map(String::as_str))
            .collect();
        if let Some(extra) = extra {
            pairs.push(extra);
        }
        if pairs.is_empty() {
            return String::new();
        }

        let mut out = String::from("{");
        for (i, (name, value)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}=\"{}\"", name, escape_label_value(value));
        }
        out.push('}');
        out
    }

    /// `name=value,...` form used as the JSON snapshot key.
    pub fn render_key(&self, key: &LabelKey) -> String {
        self.names
            .iter()
            .zip(key.iter())
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn describe(&self) -> String {
        self.names.join(",")
    }
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
