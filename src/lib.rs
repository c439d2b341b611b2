//! Telemetry Core
//!
//! In-process observability for a running service: metrics, distributed
//! tracing, rule-driven alerting, and trace-correlated structured logs.
//!
//! # Components
//!
//! - **MetricsCollector**: counters, gauges, and windowed histograms with a
//!   typed label schema; Prometheus text and JSON snapshots.
//! - **Tracer**: spans with ambient parent resolution, header propagation,
//!   and a bounded buffer of finished spans.
//! - **AlertManager**: deduplicated alerts, hysteresis rules evaluated on a
//!   background thread, isolated notifiers.
//! - **StructuredLogger**: JSON or colored text records enriched with the
//!   active trace and the per-request field bag.
//!
//! # Wiring
//!
//! Build one [`Telemetry`] at the composition root and hand its handles to
//! the code that needs them. For code that cannot be reached that way,
//! [`init`] installs a process-wide instance behind [`metrics()`],
//! [`tracer()`], [`alert_manager()`], and [`logger()`]; on first use
//! without `init` it is built from [`config::load`].

pub mod alerting;
pub mod ambient;
pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod trace;

use std::sync::{Arc, OnceLock};

use thiserror::Error;

use alerting::AlertManager;
use config::TelemetryConfig;
use logging::{LogError, Logger, StructuredLogger};
use metrics::MetricsCollector;
use trace::Tracer;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("Telemetry already initialized")]
    AlreadyInitialized,
    #[error("Logging setup failed: {0}")]
    Logging(#[from] LogError),
}

/// One instance of every component, built from a single configuration.
#[derive(Clone)]
pub struct Telemetry {
    config: TelemetryConfig,
    metrics: MetricsCollector,
    tracer: Tracer,
    logger: StructuredLogger,
    alerts: Arc<AlertManager>,
}

impl Telemetry {
    pub fn new(config: TelemetryConfig) -> Result<Self, LogError> {
        let logger = StructuredLogger::with_config(&config.logging)?;
        Ok(Self {
            metrics: MetricsCollector::new(config.metrics.clone()),
            tracer: Tracer::new(config.tracer.clone()),
            alerts: Arc::new(AlertManager::new(config.alerting.clone())),
            logger,
            config,
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn alert_manager(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn structured_logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn logger(&self, name: &str) -> Logger {
        self.logger.get(name)
    }

    /// Stop the alert evaluator if it is running.
    pub fn shutdown(&self) {
        if self.alerts.is_running() {
            let _ = self.alerts.stop();
        }
    }
}

static GLOBAL: OnceLock<Telemetry> = OnceLock::new();

/// Install the process-wide instance.
pub fn init(config: TelemetryConfig) -> Result<&'static Telemetry, InitError> {
    if GLOBAL.get().is_some() {
        return Err(InitError::AlreadyInitialized);
    }
    let telemetry = Telemetry::new(config)?;
    GLOBAL
        .set(telemetry)
        .map_err(|_| InitError::AlreadyInitialized)?;
    Ok(global())
}

/// The process-wide instance, built from the environment on first use.
pub fn global() -> &'static Telemetry {
    GLOBAL.get_or_init(|| {
        let config = config::load();
        match Telemetry::new(config.clone()) {
            Ok(telemetry) => telemetry,
            Err(err) => {
                tracing::warn!(error = %err, "log file unavailable; logging to console only");
                let mut config = config;
                config.logging.log_file = None;
                config.logging.console = true;
                let logger = StructuredLogger::new();
                let _ = logger.configure(&config.logging);
                Telemetry {
                    metrics: MetricsCollector::new(config.metrics.clone()),
                    tracer: Tracer::new(config.tracer.clone()),
                    alerts: Arc::new(AlertManager::new(config.alerting.clone())),
                    logger,
                    config,
                }
            }
        }
    })
}

pub fn metrics() -> &'static MetricsCollector {
    global().metrics()
}

pub fn tracer() -> &'static Tracer {
    global().tracer()
}

pub fn alert_manager() -> &'static Arc<AlertManager> {
    global().alert_manager()
}

pub fn logger(name: &str) -> Logger {
    global().logger(name)
}
