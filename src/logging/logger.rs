//! StructuredLogger and per-name Logger handles.
//!
//! A [`StructuredLogger`] owns the output configuration and the sinks.
//! [`Logger`]s are cheap named handles onto it. Every call builds one
//! [`LogRecord`], enriches it with the ambient trace context and field bag,
//! and writes it to every sink. Logging never fails from the caller's
//! point of view: formatter failures degrade to a plain line and sink
//! errors are reported through `tracing`.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::format::LogFormat;
use super::record::{ErrorInfo, Level, LogRecord};
use super::sink::{ConsoleSink, FileSink, LogSink};
use super::LogError;
use crate::ambient;

/// Output settings applied by [`StructuredLogger::configure`].
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json_output: bool,
    pub log_file: Option<PathBuf>,
    pub service: String,
    /// Write to stderr in addition to any file.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            json_output: false,
            log_file: None,
            service: "app".to_string(),
            console: true,
        }
    }
}

struct Output {
    level: Level,
    json: bool,
    service: String,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Output {
    fn build(config: &LoggingConfig) -> Result<Self, LogError> {
        let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();
        if config.console {
            sinks.push(Arc::new(ConsoleSink::new(!config.json_output)));
        }
        if let Some(path) = &config.log_file {
            let sink = FileSink::open(path).map_err(|e| LogError::FileOpen {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            sinks.push(Arc::new(sink));
        }
        Ok(Self {
            level: config.level,
            json: config.json_output,
            service: config.service.clone(),
            sinks,
        })
    }

    fn unconfigured() -> Self {
        Self {
            level: Level::Info,
            json: false,
            service: "app".to_string(),
            sinks: vec![Arc::new(ConsoleSink::new(true))],
        }
    }
}

struct Core {
    configured: OnceLock<Output>,
    fallback: Output,
    extra_sinks: RwLock<Vec<Arc<dyn LogSink>>>,
    loggers: Mutex<HashMap<String, Logger>>,
    host: String,
}

impl Core {
    fn output(&self) -> &Output {
        self.configured.get().unwrap_or(&self.fallback)
    }
}

/// Process-level logging configuration shared by all [`Logger`]s.
///
/// Until [`configure`](Self::configure) is called, records at `INFO` and
/// above go to stderr as colored text.
#[derive(Clone)]
pub struct StructuredLogger {
    core: Arc<Core>,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredLogger {
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            core: Arc::new(Core {
                configured: OnceLock::new(),
                fallback: Output::unconfigured(),
                extra_sinks: RwLock::new(Vec::new()),
                loggers: Mutex::new(HashMap::new()),
                host,
            }),
        }
    }

    /// Create and configure in one step.
    pub fn with_config(config: &LoggingConfig) -> Result<Self, LogError> {
        let logger = Self::new();
        logger.configure(config)?;
        Ok(logger)
    }

    /// Apply `config`. Only the first successful call takes effect; later
    /// calls return `Ok(false)` without touching the output.
    pub fn configure(&self, config: &LoggingConfig) -> Result<bool, LogError> {
        if self.core.configured.get().is_some() {
            return Ok(false);
        }
        let output = Output::build(config)?;
        Ok(self.core.configured.set(output).is_ok())
    }

    pub fn is_configured(&self) -> bool {
        self.core.configured.get().is_some()
    }

    pub fn level(&self) -> Level {
        self.core.output().level
    }

    pub fn service(&self) -> &str {
        &self.core.output().service
    }

    /// Attach an additional sink. It receives every record that passes the
    /// level filter, uncolored.
    pub fn add_sink(&self, sink: Arc<dyn LogSink>) {
        self.core.extra_sinks.write().push(sink);
    }

    /// The logger named `name`, created on first request.
    pub fn get(&self, name: &str) -> Logger {
        let mut loggers = self.core.loggers.lock();
        loggers
            .entry(name.to_string())
            .or_insert_with(|| Logger {
                name: Arc::from(name),
                core: self.core.clone(),
            })
            .clone()
    }
}

/// A named handle for emitting records.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    core: Arc<Core>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        level >= self.core.output().level
    }

    pub fn log(&self, level: Level, message: &str, fields: &[(&str, Value)]) {
        self.emit(level, message, fields, None, None);
    }

    pub fn debug(&self, message: &str, fields: &[(&str, Value)]) {
        self.emit(Level::Debug, message, fields, None, None);
    }

    pub fn info(&self, message: &str, fields: &[(&str, Value)]) {
        self.emit(Level::Info, message, fields, None, None);
    }

    pub fn warning(&self, message: &str, fields: &[(&str, Value)]) {
        self.emit(Level::Warning, message, fields, None, None);
    }

    pub fn error(&self, message: &str, fields: &[(&str, Value)]) {
        self.emit(Level::Error, message, fields, None, None);
    }

    pub fn critical(&self, message: &str, fields: &[(&str, Value)]) {
        self.emit(Level::Critical, message, fields, None, None);
    }

    /// Log at `ERROR` with `err`'s type, message, and source chain attached.
    pub fn exception<E>(&self, message: &str, err: &E, fields: &[(&str, Value)])
    where
        E: std::error::Error + ?Sized,
    {
        self.emit(
            Level::Error,
            message,
            fields,
            Some(ErrorInfo::from_error(err)),
            None,
        );
    }

    /// Start timing `operation`. The returned scope emits exactly one
    /// "completed" or "failed" record when it is dropped.
    pub fn timed(&self, operation: &str, fields: &[(&str, Value)]) -> TimedScope {
        TimedScope {
            logger: self.clone(),
            operation: operation.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            started: Instant::now(),
            failure: None,
            abandoned: None,
        }
    }

    /// Run `f` inside a timed scope. An `Err` marks the scope failed and is
    /// returned unchanged.
    pub fn timed_result<T, E, F>(&self, operation: &str, fields: &[(&str, Value)], f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let mut scope = self.timed(operation, fields);
        let result = f();
        if let Err(e) = &result {
            scope.fail(e);
        }
        result
    }

    /// Await `fut` inside a timed scope. Dropping the future before it
    /// completes records a "cancelled" failure.
    pub async fn timed_async<T, E, F>(
        &self,
        operation: &str,
        fields: &[(&str, Value)],
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut scope = self.timed(operation, fields);
        scope.abandoned = Some(ErrorInfo::new("Cancelled", "cancelled"));
        let result = fut.await;
        if let Err(e) = &result {
            scope.fail(e);
        }
        scope.finish();
        result
    }

    fn emit(
        &self,
        level: Level,
        message: &str,
        fields: &[(&str, Value)],
        error: Option<ErrorInfo>,
        duration_ms: Option<f64>,
    ) {
        let output = self.core.output();
        if level < output.level {
            return;
        }
        let record = self.build_record(output, level, message, fields, error, duration_ms);

        let format = if output.json {
            LogFormat::Json
        } else {
            LogFormat::Text { color: false }
        };
        let plain = format.format_or_fallback(&record);
        let mut colored: Option<String> = None;

        let extra = self.core.extra_sinks.read();
        for sink in output.sinks.iter().chain(extra.iter()) {
            let line: &str = if !output.json && sink.supports_color() {
                colored.get_or_insert_with(|| {
                    LogFormat::Text { color: true }.format_or_fallback(&record)
                })
            } else {
                &plain
            };
            match catch_unwind(AssertUnwindSafe(|| sink.write_line(line))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!(logger = %self.name, error = %err, "log sink write failed");
                }
                Err(_) => {
                    tracing::warn!(logger = %self.name, "log sink panicked");
                }
            }
        }
    }

    fn build_record(
        &self,
        output: &Output,
        level: Level,
        message: &str,
        fields: &[(&str, Value)],
        error: Option<ErrorInfo>,
        duration_ms: Option<f64>,
    ) -> LogRecord {
        let mut extra: Map<String, Value> = ambient::fields();
        for (key, value) in fields {
            extra.insert(key.to_string(), value.clone());
        }
        let bag_trace = take_string(&mut extra, "trace_id");
        let bag_span = take_string(&mut extra, "span_id");

        let (trace_id, span_id) = match ambient::current_trace_context() {
            Some(ctx) => (Some(ctx.trace_id), Some(ctx.span_id)),
            None => (bag_trace, bag_span),
        };

        LogRecord {
            timestamp: Utc::now(),
            level,
            logger: self.name.to_string(),
            message: message.to_string(),
            trace_id,
            span_id,
            service: output.service.clone(),
            host: self.core.host.clone(),
            extra,
            error,
            duration_ms,
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Timing scope returned by [`Logger::timed`].
pub struct TimedScope {
    logger: Logger,
    operation: String,
    fields: Vec<(String, Value)>,
    started: Instant,
    failure: Option<ErrorInfo>,
    abandoned: Option<ErrorInfo>,
}

impl TimedScope {
    /// Mark the operation failed with `err`.
    pub fn fail<E: Display + ?Sized>(&mut self, err: &E) {
        self.failure = Some(ErrorInfo::new(
            std::any::type_name::<E>(),
            err.to_string(),
        ));
    }

    /// Add a field to the closing record.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// End the scope now.
    pub fn finish(mut self) {
        self.abandoned = None;
    }
}

impl Drop for TimedScope {
    fn drop(&mut self) {
        let failure = self.failure.take().or_else(|| {
            if std::thread::panicking() {
                Some(ErrorInfo::new("Panic", "panicked"))
            } else {
                self.abandoned.take()
            }
        });
        let duration_ms = self.elapsed_ms();
        let (level, outcome) = match failure {
            Some(_) => (Level::Error, "failed"),
            None => (Level::Info, "completed"),
        };

        let mut fields: Vec<(&str, Value)> = Vec::with_capacity(self.fields.len() + 2);
        fields.push(("operation", Value::from(self.operation.as_str())));
        fields.push(("status", Value::from(outcome)));
        fields.extend(self.fields.iter().map(|(k, v)| (k.as_str(), v.clone())));

        let message = format!("{} {}", self.operation, outcome);
        self.logger
            .emit(level, &message, &fields, failure, Some(duration_ms));
    }
}
