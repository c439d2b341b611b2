//! Alert state, rule evaluation, and notification fan-out.
//!
//! # Locking
//!
//! `rules`, `active`, `history`, and `notifiers` each have their own lock.
//! When `active` and `history` are both needed they are taken in that
//! order. Notifiers and rule conditions always run with no lock held.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::alert::{Alert, AlertKey, AlertStatus};
use super::evaluator::EvaluatorHandle;
use super::notifier::Notifier;
use super::rule::{AlertRule, Decision, RuleState};

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert rule already registered: {0}")]
    DuplicateRule(String),
    #[error("Alert rule not found: {0}")]
    UnknownRule(String),
    #[error("Evaluator already running")]
    AlreadyRunning,
    #[error("Evaluator not running")]
    NotRunning,
    #[error("Failed to spawn evaluator: {0}")]
    Spawn(String),
}

/// Alert manager configuration.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Maximum occurrences kept in history.
    pub max_history: usize,
    /// Tick interval used by [`AlertManager::start_default`].
    pub evaluation_interval: Duration,
    /// How long [`AlertManager::stop`] waits for the evaluator thread.
    pub stop_timeout: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            evaluation_interval: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters and gauges describing the manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_rules: usize,
    pub enabled_rules: usize,
    /// Firing plus silenced.
    pub active_alerts: usize,
    pub silenced_alerts: usize,
    pub history_size: usize,
    pub total_fired: u64,
    pub total_resolved: u64,
    pub notifiers: usize,
    pub active_by_severity: BTreeMap<String, usize>,
}

/// What a single evaluation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub fired: usize,
    pub renotified: usize,
    pub resolved: usize,
}

struct RuleEntry {
    rule: AlertRule,
    enabled: AtomicBool,
    state: Mutex<RuleState>,
}

struct ActiveAlert {
    alert: Alert,
    /// `None` on a silenced alert means the silence never expires.
    silenced_until: Option<Instant>,
}

pub struct AlertManager {
    config: AlertConfig,
    rules: RwLock<Vec<Arc<RuleEntry>>>,
    active: Mutex<HashMap<AlertKey, ActiveAlert>>,
    history: Mutex<VecDeque<Alert>>,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    total_fired: AtomicU64,
    total_resolved: AtomicU64,
    pub(super) evaluator: Mutex<Option<EvaluatorHandle>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        let config = AlertConfig {
            max_history: config.max_history.max(1),
            ..config
        };
        Self {
            config,
            rules: RwLock::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            notifiers: RwLock::new(Vec::new()),
            total_fired: AtomicU64::new(0),
            total_resolved: AtomicU64::new(0),
            evaluator: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    // ========================================================================
    // Rules and notifiers
    // ========================================================================

    pub fn add_rule(&self, rule: AlertRule) -> Result<(), AlertError> {
        let mut rules = self.rules.write();
        if rules.iter().any(|e| e.rule.name == rule.name) {
            return Err(AlertError::DuplicateRule(rule.name));
        }
        tracing::debug!(rule = %rule.name, "alert rule added");
        rules.push(Arc::new(RuleEntry {
            enabled: AtomicBool::new(rule.enabled),
            rule,
            state: Mutex::new(RuleState::default()),
        }));
        Ok(())
    }

    /// Remove a rule. Alerts it already fired stay as they are.
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|e| e.rule.name != name);
        rules.len() != before
    }

    /// Enable or disable a rule. Disabling clears its evaluation state and
    /// resolves the occurrence it fired, if still active.
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<(), AlertError> {
        let entry = self
            .rules
            .read()
            .iter()
            .find(|e| e.rule.name == name)
            .cloned()
            .ok_or_else(|| AlertError::UnknownRule(name.to_string()))?;
        entry.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            *entry.state.lock() = RuleState::default();
            self.resolve(&entry.rule.name, Some(&entry.rule.labels));
        }
        Ok(())
    }

    /// Registered rule names in registration order.
    pub fn rules(&self) -> Vec<String> {
        self.rules.read().iter().map(|e| e.rule.name.clone()).collect()
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifiers.write().push(notifier);
    }

    // ========================================================================
    // Alert lifecycle
    // ========================================================================

    /// Record `alert` as firing and notify. Returns `false` without
    /// notifying when an alert with the same name and labels is already
    /// active.
    pub fn fire(&self, alert: Alert) -> bool {
        let mut alert = alert;
        alert.status = AlertStatus::Firing;
        alert.resolved_at = None;
        alert.silenced_until = None;

        {
            let mut active = self.active.lock();
            let key = alert.key();
            if active.contains_key(&key) {
                tracing::debug!(alert = %alert.name, "duplicate alert suppressed");
                return false;
            }
            active.insert(
                key,
                ActiveAlert {
                    alert: alert.clone(),
                    silenced_until: None,
                },
            );
            self.record_history(alert.clone());
        }

        self.total_fired.fetch_add(1, Ordering::Relaxed);
        self.dispatch(&alert);
        true
    }

    /// Resolve active alerts named `name`, restricted to exactly `labels`
    /// when given. Returns how many were resolved.
    pub fn resolve(&self, name: &str, labels: Option<&BTreeMap<String, String>>) -> usize {
        let resolved: Vec<Alert> = {
            let mut active = self.active.lock();
            let keys: Vec<AlertKey> = active
                .keys()
                .filter(|(n, l)| n == name && labels.map_or(true, |want| want == l))
                .cloned()
                .collect();

            let now = Utc::now();
            keys.into_iter()
                .filter_map(|key| active.remove(&key))
                .map(|entry| {
                    let mut alert = entry.alert;
                    alert.status = AlertStatus::Resolved;
                    alert.resolved_at = Some(now);
                    alert.silenced_until = None;
                    self.record_history(alert.clone());
                    alert
                })
                .collect()
        };

        self.total_resolved
            .fetch_add(resolved.len() as u64, Ordering::Relaxed);
        for alert in &resolved {
            self.dispatch(alert);
        }
        resolved.len()
    }

    /// Silence active alerts named `name` for `duration`. Silenced alerts
    /// stay active but send no notifications; they revert to firing when
    /// the silence expires. A duration too large to represent silences
    /// until resolved. Returns how many were silenced.
    pub fn silence(&self, name: &str, duration: Duration) -> usize {
        let until = Instant::now().checked_add(duration);
        let until_wall = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));

        let mut active = self.active.lock();
        let mut count = 0;
        for ((alert_name, _), entry) in active.iter_mut() {
            if alert_name != name {
                continue;
            }
            entry.alert.status = AlertStatus::Silenced;
            entry.alert.silenced_until = until_wall;
            entry.silenced_until = until;
            self.record_history(entry.alert.clone());
            count += 1;
        }
        if count > 0 {
            tracing::info!(alert = %name, silenced = count, ?duration, "alerts silenced");
        }
        count
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    pub fn evaluate(&self) -> EvaluationOutcome {
        self.evaluate_at(Instant::now())
    }

    /// Run one evaluation pass as of `now`.
    pub fn evaluate_at(&self, now: Instant) -> EvaluationOutcome {
        self.expire_silences(now);

        let rules: Vec<Arc<RuleEntry>> = self.rules.read().clone();
        let mut outcome = EvaluationOutcome::default();

        for entry in rules {
            if !entry.enabled.load(Ordering::Relaxed) {
                continue;
            }
            let rule = &entry.rule;
            let holds = match catch_unwind(AssertUnwindSafe(|| (rule.condition)())) {
                Ok(holds) => holds,
                Err(_) => {
                    tracing::warn!(rule = %rule.name, "alert condition panicked; treated as false");
                    false
                }
            };

            let decision = entry.state.lock().step(rule, holds, now);
            match decision {
                Decision::Idle => {}
                Decision::Fire => {
                    if self.fire(rule.to_alert()) {
                        outcome.fired += 1;
                    }
                }
                Decision::Renotify => {
                    if self.renotify(rule) {
                        outcome.renotified += 1;
                    }
                }
                Decision::Resolve => {
                    outcome.resolved += self.resolve(&rule.name, Some(&rule.labels));
                }
            }
        }
        outcome
    }

    /// Repeat the notification for a rule's active occurrence. Suppressed
    /// while silenced; fires a fresh occurrence if the old one was resolved
    /// by hand.
    fn renotify(&self, rule: &AlertRule) -> bool {
        let key: AlertKey = (rule.name.clone(), rule.labels.clone());
        let existing = {
            let active = self.active.lock();
            active.get(&key).map(|e| e.alert.clone())
        };
        match existing {
            Some(alert) if alert.status == AlertStatus::Silenced => false,
            Some(alert) => {
                self.dispatch(&alert);
                true
            }
            None => self.fire(rule.to_alert()),
        }
    }

    fn expire_silences(&self, now: Instant) {
        let mut active = self.active.lock();
        for entry in active.values_mut() {
            match entry.silenced_until {
                Some(until) if until <= now => {
                    entry.silenced_until = None;
                    entry.alert.status = AlertStatus::Firing;
                    entry.alert.silenced_until = None;
                    self.record_history(entry.alert.clone());
                    tracing::debug!(alert = %entry.alert.name, "silence expired");
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    // Read side
    // ========================================================================

    /// Firing and silenced alerts, oldest first.
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.expire_silences(Instant::now());
        let mut alerts: Vec<Alert> = self
            .active
            .lock()
            .values()
            .map(|e| e.alert.clone())
            .collect();
        alerts.sort_by(|a, b| a.fired_at.cmp(&b.fired_at).then_with(|| a.name.cmp(&b.name)));
        alerts
    }

    /// The most recent `limit` occurrences in history, oldest first. Each
    /// occurrence appears once, in its latest state.
    pub fn get_history(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn get_stats(&self) -> AlertStats {
        self.expire_silences(Instant::now());

        let (total_rules, enabled_rules) = {
            let rules = self.rules.read();
            let enabled = rules
                .iter()
                .filter(|e| e.enabled.load(Ordering::Relaxed))
                .count();
            (rules.len(), enabled)
        };

        let mut stats = AlertStats {
            total_rules,
            enabled_rules,
            total_fired: self.total_fired.load(Ordering::Relaxed),
            total_resolved: self.total_resolved.load(Ordering::Relaxed),
            notifiers: self.notifiers.read().len(),
            ..AlertStats::default()
        };
        {
            let active = self.active.lock();
            stats.active_alerts = active.len();
            for entry in active.values() {
                if entry.alert.status == AlertStatus::Silenced {
                    stats.silenced_alerts += 1;
                }
                *stats
                    .active_by_severity
                    .entry(entry.alert.severity.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        stats.history_size = self.history.lock().len();
        stats
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Insert or update `alert` in history, matched by occurrence id.
    fn record_history(&self, alert: Alert) {
        let mut history = self.history.lock();
        if let Some(slot) = history.iter_mut().rev().find(|a| a.id == alert.id) {
            *slot = alert;
            return;
        }
        while history.len() >= self.config.max_history {
            history.pop_front();
        }
        history.push_back(alert);
    }

    fn dispatch(&self, alert: &Alert) {
        let notifiers: Vec<Arc<dyn Notifier>> = self.notifiers.read().clone();
        for notifier in notifiers {
            match catch_unwind(AssertUnwindSafe(|| notifier.notify(alert))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        notifier = notifier.name(),
                        alert = %alert.name,
                        error = %err,
                        "alert notifier failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        notifier = notifier.name(),
                        alert = %alert.name,
                        "alert notifier panicked"
                    );
                }
            }
        }
    }
}

impl Drop for AlertManager {
    fn drop(&mut self) {
        if let Some(handle) = self.evaluator.get_mut().take() {
            handle.signal_stop();
        }
    }
}
