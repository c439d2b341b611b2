//! Alert notification sinks.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use super::alert::{Alert, AlertStatus, Severity};
use crate::logging::{Level, Logger};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifier {notifier} failed: {reason}")]
    Failed { notifier: String, reason: String },
}

impl NotifyError {
    pub fn failed(notifier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Failed {
            notifier: notifier.into(),
            reason: reason.to_string(),
        }
    }
}

/// Receives every fired, re-notified, and resolved alert.
///
/// Called synchronously from `fire`/`resolve` and the evaluation loop,
/// never while the manager holds a lock. Errors and panics are caught and
/// logged; they never reach the caller or other notifiers.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Notifier backed by a closure.
pub struct FnNotifier<F> {
    name: String,
    f: F,
}

impl<F> FnNotifier<F>
where
    F: Fn(&Alert) -> Result<(), NotifyError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Notifier for FnNotifier<F>
where
    F: Fn(&Alert) -> Result<(), NotifyError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        (self.f)(alert)
    }
}

/// Writes alerts through a structured logger, at a level matching severity.
pub struct LogNotifier {
    logger: Logger,
}

impl LogNotifier {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    fn level_for(alert: &Alert) -> Level {
        if alert.status == AlertStatus::Resolved {
            return Level::Info;
        }
        match alert.severity {
            Severity::Info => Level::Info,
            Severity::Warning => Level::Warning,
            Severity::Error => Level::Error,
            Severity::Critical => Level::Critical,
        }
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let message = format!("alert {} {}: {}", alert.name, alert.status.as_str(), alert.message);
        self.logger.log(
            Self::level_for(alert),
            &message,
            &[
                ("alert", alert.to_json()),
                ("alert_id", Value::from(alert.id.to_string())),
            ],
        );
        Ok(())
    }
}

/// Publishes alerts on a `tokio` broadcast channel for async consumers.
///
/// Sending with no live subscribers is not an error.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Alert>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(alert.clone())
            .map(|_| ())
            .map_err(|e| NotifyError::failed("broadcast", e))
    }
}
