//! JSON and colored-text record formatting.

use std::fmt::Write;

use colored::Colorize;

use super::record::{Level, LogRecord};

/// Output format of the structured logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// One summary line, colorized when `color` is set, plus traceback.
    Text { color: bool },
}

impl LogFormat {
    pub fn format(&self, record: &LogRecord) -> Result<String, serde_json::Error> {
        match self {
            Self::Json => serde_json::to_string(record),
            Self::Text { color } => Ok(format_text(record, *color)),
        }
    }

    /// Format `record`, degrading to a minimal plain line on failure.
    pub fn format_or_fallback(&self, record: &LogRecord) -> String {
        let formatted =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.format(record)));
        match formatted {
            Ok(Ok(line)) => line,
            _ => fallback(record),
        }
    }
}

pub(crate) fn fallback(record: &LogRecord) -> String {
    format!(
        "{} {} [{}] {}",
        record.timestamp.to_rfc3339(),
        record.level,
        record.logger,
        record.message
    )
}

fn paint(level: Level, color: bool) -> String {
    let label = format!("{:<8}", level.as_str());
    if !color {
        return label;
    }
    match level {
        Level::Debug => label.blue().to_string(),
        Level::Info => label.green().to_string(),
        Level::Warning => label.yellow().to_string(),
        Level::Error => label.red().to_string(),
        Level::Critical => label.white().on_red().bold().to_string(),
    }
}

fn format_text(record: &LogRecord, color: bool) -> String {
    let mut line = format!(
        "{} {} [{}] {}",
        record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        paint(record.level, color),
        record.logger,
        record.message
    );

    if let Some(trace_id) = &record.trace_id {
        let _ = write!(line, " trace_id={}", trace_id);
    }
    if let Some(span_id) = &record.span_id {
        let _ = write!(line, " span_id={}", span_id);
    }
    for (key, value) in &record.extra {
        match value {
            serde_json::Value::String(s) => {
                let _ = write!(line, " {}={}", key, s);
            }
            other => {
                let _ = write!(line, " {}={}", key, other);
            }
        }
    }
    if let Some(duration) = record.duration_ms {
        let _ = write!(line, " ({:.2}ms)", duration);
    }
    if let Some(error) = &record.error {
        let _ = write!(line, "\n{}: {}", error.kind, error.message);
        if let Some(traceback) = &error.traceback {
            let _ = write!(line, "\n{}", traceback);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::ErrorInfo;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn record() -> LogRecord {
        let mut extra = Map::new();
        extra.insert("user".to_string(), json!("u1"));
        LogRecord {
            timestamp: Utc::now(),
            level: Level::Warning,
            logger: "api".to_string(),
            message: "slow request".to_string(),
            trace_id: Some("abc".to_string()),
            span_id: None,
            service: "svc".to_string(),
            host: "h".to_string(),
            extra,
            error: None,
            duration_ms: Some(12.5),
        }
    }

    #[test]
    fn test_json_has_all_fields() {
        let line = LogFormat::Json.format(&record()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        for field in [
            "timestamp", "level", "logger", "message", "trace_id", "span_id", "service", "host",
            "extra", "error", "duration_ms",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(value["level"], "WARNING");
        assert_eq!(value["extra"]["user"], "u1");
    }

    #[test]
    fn test_text_plain_line() {
        let line = LogFormat::Text { color: false }.format(&record()).unwrap();
        assert!(line.contains("WARNING"));
        assert!(line.contains("[api] slow request"));
        assert!(line.contains("trace_id=abc"));
        assert!(line.contains("user=u1"));
        assert!(line.contains("(12.50ms)"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_text_includes_traceback() {
        let mut r = record();
        r.error = Some(ErrorInfo {
            kind: "IoError".to_string(),
            message: "boom".to_string(),
            traceback: Some("caused by: disk".to_string()),
        });
        let line = LogFormat::Text { color: false }.format(&r).unwrap();
        assert!(line.contains("\nIoError: boom\ncaused by: disk"));
    }

    #[test]
    fn test_fallback_line() {
        let line = fallback(&record());
        assert!(line.contains("WARNING [api] slow request"));
    }
}
