//! Rule-driven alerting with deduplication, hysteresis, and notifiers.
//!
//! # State Machine
//!
//! ```text
//! Normal --(condition true for >= for_duration)--> Firing
//! Firing --(condition false)--> Normal   (occurrence marked Resolved)
//! Firing --(silence)--> Silenced --(silence expires)--> Firing
//! ```
//!
//! While firing, a rule re-notifies at most once per `repeat_interval`.

mod alert;
mod evaluator;
mod manager;
mod notifier;
mod rule;

pub use alert::{Alert, AlertKey, AlertStatus, Severity};
pub use manager::{AlertConfig, AlertError, AlertManager, AlertStats, EvaluationOutcome};
pub use notifier::{BroadcastNotifier, FnNotifier, LogNotifier, Notifier, NotifyError};
pub use rule::{AlertRule, Condition};
