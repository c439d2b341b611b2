//! Structured logging correlated with the active trace.
//!
//! # Record Flow
//!
//! ```text
//! Logger::info(msg, fields)
//!     -> level filter (dropped before formatting)
//!     -> LogRecord { ambient trace/span id, field bag + fields }
//!     -> LogFormat (JSON line | colored text, plain fallback)
//!     -> every LogSink (console, file, added sinks)
//! ```

mod context;
pub mod diagnostics;
mod format;
mod logger;
mod record;
mod sink;

use thiserror::Error;

pub use context::{clear_context, get_context, set_context, with_log_context};
pub use diagnostics::{init_diagnostics, DiagnosticsConfig, DiagnosticsError, DiagnosticsFormat};
pub use format::LogFormat;
pub use logger::{Logger, LoggingConfig, StructuredLogger, TimedScope};
pub use record::{ErrorInfo, Level, LogRecord};
pub use sink::{ConsoleSink, FileSink, LogSink, MemorySink};

/// Errors from logger configuration.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Failed to open log file {path}: {reason}")]
    FileOpen { path: String, reason: String },
}
