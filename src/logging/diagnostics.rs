//! Subscriber for the crate's own `tracing` diagnostics.
//!
//! Notifier failures, evaluator lifecycle, and label mismatches are
//! reported through `tracing`. Applications that do not install their own
//! subscriber can call [`init_diagnostics`] once at startup.

use std::fs::OpenOptions;
use std::path::PathBuf;

use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Diagnostics output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiagnosticsFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    pub format: DiagnosticsFormat,
    /// `EnvFilter` directive, e.g. `"warn"` or `"telemetry_core=debug"`.
    pub filter: String,
    /// Append to this file instead of stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            format: DiagnosticsFormat::Json,
            filter: "telemetry_core=warn".to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("Invalid diagnostics filter: {0}")]
    InvalidFilter(String),
    #[error("Failed to open diagnostics file: {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Install the global `tracing` subscriber.
pub fn init_diagnostics(config: &DiagnosticsConfig) -> Result<(), DiagnosticsError> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| DiagnosticsError::InvalidFilter(e.to_string()))?;

    let writer = match &config.output_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| DiagnosticsError::FileOpen(format!("{}: {}", path.display(), e)))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        DiagnosticsFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        DiagnosticsFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(writer))
            .try_init(),
    };
    installed.map_err(|_| DiagnosticsError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = DiagnosticsConfig {
            filter: "telemetry_core=loudest".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_diagnostics(&config),
            Err(DiagnosticsError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_unopenable_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiagnosticsConfig {
            output_path: Some(dir.path().join("missing").join("diag.log")),
            ..Default::default()
        };
        assert!(matches!(
            init_diagnostics(&config),
            Err(DiagnosticsError::FileOpen(_))
        ));
    }
}
