//! Telemetry configuration from environment variables or a TOML file.
//!
//! Values are loaded from `TELEMETRY_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without crashing, and
//! sizes are floored so no buffer can be configured to zero.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TELEMETRY_SERVICE_NAME` | app | Service name on spans and log records |
//! | `TELEMETRY_LOG_LEVEL` | info | Minimum structured log level |
//! | `TELEMETRY_LOG_JSON` | false | JSON log lines instead of colored text |
//! | `TELEMETRY_LOG_FILE` | (unset) | Append log lines to this file |
//! | `TELEMETRY_HISTOGRAM_CAPACITY` | 10000 | Samples kept per histogram series |
//! | `TELEMETRY_MAX_SPANS` | 10000 | Finished spans retained |
//! | `TELEMETRY_ALERT_HISTORY` | 1000 | Alert occurrences retained |
//! | `TELEMETRY_ALERT_INTERVAL_SECS` | 30 | Rule evaluation interval |
//! | `TELEMETRY_ALERT_STOP_TIMEOUT_SECS` | 5 | Evaluator stop wait |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alerting::AlertConfig;
use crate::logging::{Level, LoggingConfig};
use crate::metrics::MetricsConfig;
use crate::trace::TracerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Invalid config document: {0}")]
    Parse(String),
    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Configuration for every component.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub metrics: MetricsConfig,
    pub tracer: TracerConfig,
    pub alerting: AlertConfig,
    pub logging: LoggingConfig,
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub service_name: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_file: Option<String>,
    pub histogram_capacity: usize,
    pub max_spans: usize,
    pub alert_history: usize,
    pub alert_interval_secs: u64,
    pub alert_stop_timeout_secs: u64,
}

const MIN_INTERVAL_SECS: u64 = 1;

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> TelemetryConfig {
    let service_name = non_empty_var("TELEMETRY_SERVICE_NAME").unwrap_or_else(|| "app".to_string());
    let level = non_empty_var("TELEMETRY_LOG_LEVEL")
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::Info);

    let histogram_capacity = parse_usize("TELEMETRY_HISTOGRAM_CAPACITY", 10_000).max(1);
    let max_spans = parse_usize("TELEMETRY_MAX_SPANS", 10_000).max(1);
    let max_history = parse_usize("TELEMETRY_ALERT_HISTORY", 1000).max(1);
    let interval_secs = parse_u64("TELEMETRY_ALERT_INTERVAL_SECS", 30).max(MIN_INTERVAL_SECS);
    let stop_secs = parse_u64("TELEMETRY_ALERT_STOP_TIMEOUT_SECS", 5);

    TelemetryConfig {
        metrics: MetricsConfig { histogram_capacity },
        tracer: TracerConfig {
            service_name: service_name.clone(),
            max_spans,
        },
        alerting: AlertConfig {
            max_history,
            evaluation_interval: Duration::from_secs(interval_secs),
            stop_timeout: Duration::from_secs(stop_secs),
        },
        logging: LoggingConfig {
            level,
            json_output: parse_bool("TELEMETRY_LOG_JSON", false),
            log_file: non_empty_var("TELEMETRY_LOG_FILE").map(PathBuf::from),
            service: service_name,
            console: true,
        },
    }
}

// ============================================================================
// TOML
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    service_name: Option<String>,
    #[serde(default)]
    metrics: FileMetrics,
    #[serde(default)]
    tracing: FileTracing,
    #[serde(default)]
    alerting: FileAlerting,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileMetrics {
    histogram_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTracing {
    max_spans: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileAlerting {
    max_history: Option<usize>,
    evaluation_interval_secs: Option<u64>,
    stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLogging {
    level: Option<String>,
    json: Option<bool>,
    file: Option<PathBuf>,
    console: Option<bool>,
}

/// Parse a TOML document. Missing keys take their defaults; unknown keys
/// and unparseable levels are errors.
///
/// ```toml
/// service_name = "checkout"
///
/// [metrics]
/// histogram_capacity = 5000
///
/// [tracing]
/// max_spans = 2000
///
/// [alerting]
/// max_history = 500
/// evaluation_interval_secs = 15
/// stop_timeout_secs = 5
///
/// [logging]
/// level = "debug"
/// json = true
/// file = "/var/log/checkout.log"
/// ```
pub fn from_toml_str(document: &str) -> Result<TelemetryConfig, ConfigError> {
    let file: FileConfig =
        toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = TelemetryConfig::default();
    let service_name = file.service_name.unwrap_or(defaults.tracer.service_name);

    let level = match file.logging.level {
        Some(level) => level.parse::<Level>().map_err(|e| ConfigError::Invalid {
            key: "logging.level",
            reason: e.to_string(),
        })?,
        None => defaults.logging.level,
    };

    Ok(TelemetryConfig {
        metrics: MetricsConfig {
            histogram_capacity: file
                .metrics
                .histogram_capacity
                .unwrap_or(defaults.metrics.histogram_capacity)
                .max(1),
        },
        tracer: TracerConfig {
            service_name: service_name.clone(),
            max_spans: file
                .tracing
                .max_spans
                .unwrap_or(defaults.tracer.max_spans)
                .max(1),
        },
        alerting: AlertConfig {
            max_history: file
                .alerting
                .max_history
                .unwrap_or(defaults.alerting.max_history)
                .max(1),
            evaluation_interval: file
                .alerting
                .evaluation_interval_secs
                .map(|s| Duration::from_secs(s.max(MIN_INTERVAL_SECS)))
                .unwrap_or(defaults.alerting.evaluation_interval),
            stop_timeout: file
                .alerting
                .stop_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.alerting.stop_timeout),
        },
        logging: LoggingConfig {
            level,
            json_output: file.logging.json.unwrap_or(defaults.logging.json_output),
            log_file: file.logging.file,
            service: service_name,
            console: file.logging.console.unwrap_or(defaults.logging.console),
        },
    })
}

/// Read and parse a TOML config file.
pub fn load_file(path: &Path) -> Result<TelemetryConfig, ConfigError> {
    let document = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    from_toml_str(&document)
}

impl TelemetryConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            service_name: self.tracer.service_name.clone(),
            log_level: self.logging.level.as_str().to_string(),
            log_json: self.logging.json_output,
            log_file: self
                .logging
                .log_file
                .as_ref()
                .map(|p| p.display().to_string()),
            histogram_capacity: self.metrics.histogram_capacity,
            max_spans: self.tracer.max_spans,
            alert_history: self.alerting.max_history,
            alert_interval_secs: self.alerting.evaluation_interval.as_secs(),
            alert_stop_timeout_secs: self.alerting.stop_timeout.as_secs(),
        }
    }
}
