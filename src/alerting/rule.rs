//! Alert rules evaluated by the background loop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::alert::{Alert, Severity};

/// A boolean condition polled on every evaluation tick.
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Fires an alert once its condition has held for `for_duration`, and
/// re-notifies at most once per `repeat_interval` while it keeps holding.
#[derive(Clone)]
pub struct AlertRule {
    pub name: String,
    pub condition: Condition,
    pub severity: Severity,
    pub message: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub for_duration: Duration,
    pub repeat_interval: Duration,
    pub enabled: bool,
}

impl fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("labels", &self.labels)
            .field("for_duration", &self.for_duration)
            .field("repeat_interval", &self.repeat_interval)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl AlertRule {
    /// A rule with no hysteresis and a five minute repeat interval.
    pub fn new<F>(name: impl Into<String>, severity: Severity, message: impl Into<String>, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            severity,
            message: message.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            for_duration: Duration::ZERO,
            repeat_interval: Duration::from_secs(300),
            enabled: true,
        }
    }

    pub fn for_duration(mut self, duration: Duration) -> Self {
        self.for_duration = duration;
        self
    }

    pub fn repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A fresh occurrence for this rule.
    pub(crate) fn to_alert(&self) -> Alert {
        let mut alert = Alert::new(self.name.clone(), self.severity, self.message.clone())
            .with_source("rule");
        alert.labels = self.labels.clone();
        alert.annotations = self.annotations.clone();
        alert
    }
}

/// Evaluation state kept per rule between ticks.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RuleState {
    pub(crate) triggered_at: Option<Instant>,
    pub(crate) last_alert_at: Option<Instant>,
}

/// What one tick decided for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Idle,
    Fire,
    Renotify,
    Resolve,
}

impl RuleState {
    /// Advance the state machine for one observation of the condition.
    pub(crate) fn step(&mut self, rule: &AlertRule, holds: bool, now: Instant) -> Decision {
        if !holds {
            let was_alerting = self.last_alert_at.is_some();
            *self = Self::default();
            return if was_alerting {
                Decision::Resolve
            } else {
                Decision::Idle
            };
        }

        let since = *self.triggered_at.get_or_insert(now);
        if now.saturating_duration_since(since) < rule.for_duration {
            return Decision::Idle;
        }
        match self.last_alert_at {
            None => {
                self.last_alert_at = Some(now);
                Decision::Fire
            }
            Some(last) if now.saturating_duration_since(last) >= rule.repeat_interval => {
                self.last_alert_at = Some(now);
                Decision::Renotify
            }
            Some(_) => Decision::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(for_secs: u64, repeat_secs: u64) -> AlertRule {
        AlertRule::new("r", Severity::Warning, "m", || true)
            .for_duration(Duration::from_secs(for_secs))
            .repeat_interval(Duration::from_secs(repeat_secs))
    }

    #[test]
    fn test_fires_after_for_duration() {
        let rule = rule(10, 60);
        let t0 = Instant::now();
        let mut state = RuleState::default();
        assert_eq!(state.step(&rule, true, t0), Decision::Idle);
        assert_eq!(state.step(&rule, true, t0 + Duration::from_secs(5)), Decision::Idle);
        assert_eq!(state.step(&rule, true, t0 + Duration::from_secs(10)), Decision::Fire);
    }

    #[test]
    fn test_flapping_never_fires() {
        let rule = rule(10, 60);
        let t0 = Instant::now();
        let mut state = RuleState::default();
        for i in 0..20 {
            let holds = i % 2 == 0;
            let decision = state.step(&rule, holds, t0 + Duration::from_secs(i * 3));
            assert_eq!(decision, Decision::Idle);
        }
    }

    #[test]
    fn test_repeat_interval_spacing() {
        let rule = rule(0, 60);
        let t0 = Instant::now();
        let mut state = RuleState::default();
        assert_eq!(state.step(&rule, true, t0), Decision::Fire);
        assert_eq!(state.step(&rule, true, t0 + Duration::from_secs(30)), Decision::Idle);
        assert_eq!(state.step(&rule, true, t0 + Duration::from_secs(60)), Decision::Renotify);
        assert_eq!(state.step(&rule, true, t0 + Duration::from_secs(90)), Decision::Idle);
        assert_eq!(state.step(&rule, false, t0 + Duration::from_secs(95)), Decision::Resolve);
        assert_eq!(state.step(&rule, false, t0 + Duration::from_secs(96)), Decision::Idle);
    }

    #[test]
    fn test_to_alert_copies_rule_identity() {
        let rule = rule(0, 60).with_label("host", "a").with_annotation("runbook", "r");
        let alert = rule.to_alert();
        assert_eq!(alert.name, "r");
        assert_eq!(alert.source, "rule");
        assert_eq!(alert.labels.get("host").map(String::as_str), Some("a"));
        assert_eq!(alert.annotations.len(), 1);
    }
}
