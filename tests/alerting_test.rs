//! Integration tests for the alert manager.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use telemetry_core::alerting::{
    Alert, AlertConfig, AlertError, AlertManager, AlertRule, AlertStatus, BroadcastNotifier,
    FnNotifier, NotifyError, Severity,
};

type Seen = Arc<Mutex<Vec<(String, AlertStatus)>>>;

fn recording_manager() -> (AlertManager, Seen) {
    let manager = AlertManager::default();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.add_notifier(Arc::new(FnNotifier::new("record", move |alert: &Alert| {
        sink.lock().push((alert.name.clone(), alert.status));
        Ok(())
    })));
    (manager, seen)
}

// =============================================================================
// Deduplication
// =============================================================================

#[test]
fn duplicate_fire_is_suppressed() {
    let (manager, seen) = recording_manager();
    let alert = Alert::new("disk_full", Severity::Warning, "disk above 95%").with_label("mount", "/");

    assert!(manager.fire(alert.clone()));
    assert!(!manager.fire(alert));
    assert!(manager.fire(
        Alert::new("disk_full", Severity::Warning, "disk above 95%").with_label("mount", "/var")
    ));

    assert_eq!(manager.get_active_alerts().len(), 2);
    assert_eq!(seen.lock().len(), 2);
    assert_eq!(manager.get_stats().total_fired, 2);
}

#[test]
fn refire_after_resolve_is_a_new_occurrence() {
    let (manager, _) = recording_manager();
    assert!(manager.fire(Alert::new("queue_backlog", Severity::Error, "backlog")));
    let first = manager.get_active_alerts()[0].id;

    assert_eq!(manager.resolve("queue_backlog", None), 1);
    assert!(manager.get_active_alerts().is_empty());

    assert!(manager.fire(Alert::new("queue_backlog", Severity::Error, "backlog")));
    let second = manager.get_active_alerts()[0].id;
    assert_ne!(first, second);

    let history = manager.get_history(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, AlertStatus::Resolved);
    assert!(history[0].resolved_at.is_some());
    assert_eq!(history[1].status, AlertStatus::Firing);
}

#[test]
fn resolve_by_labels_leaves_other_series() {
    let (manager, _) = recording_manager();
    manager.fire(Alert::new("replica_lag", Severity::Warning, "lagging").with_label("replica", "a"));
    manager.fire(Alert::new("replica_lag", Severity::Warning, "lagging").with_label("replica", "b"));

    let mut only_a = BTreeMap::new();
    only_a.insert("replica".to_string(), "a".to_string());
    assert_eq!(manager.resolve("replica_lag", Some(&only_a)), 1);

    let active = manager.get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].labels["replica"], "b");
    assert_eq!(manager.resolve("unknown", None), 0);
}

#[test]
fn history_is_bounded() {
    let manager = AlertManager::new(AlertConfig {
        max_history: 3,
        ..Default::default()
    });
    for i in 0..5 {
        manager.fire(Alert::new(format!("alert_{}", i), Severity::Info, "x"));
    }
    let history = manager.get_history(100);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].name, "alert_2");
    assert_eq!(history[2].name, "alert_4");
    assert_eq!(manager.get_history(1)[0].name, "alert_4");
}

// =============================================================================
// Rule Evaluation
// =============================================================================

#[test]
fn cpu_rule_fires_then_resolves() {
    let (manager, seen) = recording_manager();
    let cpu = Arc::new(AtomicU64::new(95));
    let reading = cpu.clone();
    manager
        .add_rule(
            AlertRule::new("cpu_high", Severity::Error, "CPU above 90%", move || {
                reading.load(Ordering::SeqCst) > 90
            })
            .repeat_interval(Duration::from_secs(60)),
        )
        .unwrap();

    let outcome = manager.evaluate();
    assert_eq!(outcome.fired, 1);
    let active = manager.get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "cpu_high");
    assert_eq!(active[0].severity, Severity::Error);
    assert_eq!(active[0].source, "rule");

    cpu.store(40, Ordering::SeqCst);
    let outcome = manager.evaluate();
    assert_eq!(outcome.resolved, 1);
    assert!(manager.get_active_alerts().is_empty());

    assert_eq!(
        *seen.lock(),
        vec![
            ("cpu_high".to_string(), AlertStatus::Firing),
            ("cpu_high".to_string(), AlertStatus::Resolved),
        ]
    );
}

#[test]
fn for_duration_and_repeat_interval() {
    let (manager, seen) = recording_manager();
    let holds = Arc::new(AtomicUsize::new(1));
    let flag = holds.clone();
    manager
        .add_rule(
            AlertRule::new("latency_high", Severity::Warning, "p99 too high", move || {
                flag.load(Ordering::SeqCst) == 1
            })
            .for_duration(Duration::from_secs(10))
            .repeat_interval(Duration::from_secs(60)),
        )
        .unwrap();

    let t0 = Instant::now();
    assert_eq!(manager.evaluate_at(t0).fired, 0);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(5)).fired, 0);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(10)).fired, 1);
    let quiet = manager.evaluate_at(t0 + Duration::from_secs(30));
    assert_eq!((quiet.fired, quiet.renotified), (0, 0));
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(70)).renotified, 1);

    holds.store(0, Ordering::SeqCst);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(80)).resolved, 1);

    let statuses: Vec<AlertStatus> = seen.lock().iter().map(|(_, s)| *s).collect();
    assert_eq!(
        statuses,
        vec![AlertStatus::Firing, AlertStatus::Firing, AlertStatus::Resolved]
    );
    assert_eq!(manager.get_stats().total_fired, 1);
}

#[test]
fn condition_flapping_resets_pending_state() {
    let (manager, _) = recording_manager();
    let holds = Arc::new(AtomicUsize::new(1));
    let flag = holds.clone();
    manager
        .add_rule(
            AlertRule::new("flappy", Severity::Info, "flapping", move || {
                flag.load(Ordering::SeqCst) == 1
            })
            .for_duration(Duration::from_secs(10)),
        )
        .unwrap();

    let t0 = Instant::now();
    manager.evaluate_at(t0);
    holds.store(0, Ordering::SeqCst);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(5)).resolved, 0);
    holds.store(1, Ordering::SeqCst);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(12)).fired, 0);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(22)).fired, 1);
}

#[test]
fn disabled_and_panicking_rules_do_not_fire() {
    let (manager, _) = recording_manager();
    manager
        .add_rule(AlertRule::new("off", Severity::Info, "off", || true).enabled(false))
        .unwrap();
    manager
        .add_rule(AlertRule::new("broken", Severity::Critical, "broken", || {
            panic!("metric source unavailable")
        }))
        .unwrap();

    let outcome = manager.evaluate();
    assert_eq!(outcome.fired, 0);
    assert!(manager.get_active_alerts().is_empty());

    manager.set_rule_enabled("off", true).unwrap();
    assert_eq!(manager.evaluate().fired, 1);
    assert!(matches!(
        manager.set_rule_enabled("missing", true),
        Err(AlertError::UnknownRule(_))
    ));
}

#[test]
fn disabling_rule_resolves_its_alert() {
    let (manager, seen) = recording_manager();
    let holds = Arc::new(AtomicUsize::new(1));
    let flag = holds.clone();
    manager
        .add_rule(AlertRule::new("conn_pool_exhausted", Severity::Error, "no free connections", move || {
            flag.load(Ordering::SeqCst) == 1
        }))
        .unwrap();

    let t0 = Instant::now();
    assert_eq!(manager.evaluate_at(t0).fired, 1);

    manager.set_rule_enabled("conn_pool_exhausted", false).unwrap();
    assert!(manager.get_active_alerts().is_empty());

    holds.store(0, Ordering::SeqCst);
    manager.set_rule_enabled("conn_pool_exhausted", true).unwrap();
    for i in 1..=4 {
        let outcome = manager.evaluate_at(t0 + Duration::from_secs(i * 30));
        assert_eq!((outcome.fired, outcome.resolved), (0, 0));
    }
    assert!(manager.get_active_alerts().is_empty());

    let statuses: Vec<AlertStatus> = seen.lock().iter().map(|(_, s)| *s).collect();
    assert_eq!(statuses, vec![AlertStatus::Firing, AlertStatus::Resolved]);

    holds.store(1, Ordering::SeqCst);
    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(200)).fired, 1);
}

#[test]
fn duplicate_rule_names_rejected() {
    let manager = AlertManager::default();
    manager
        .add_rule(AlertRule::new("dup", Severity::Info, "a", || false))
        .unwrap();
    assert!(matches!(
        manager.add_rule(AlertRule::new("dup", Severity::Info, "b", || false)),
        Err(AlertError::DuplicateRule(_))
    ));
    assert!(manager.remove_rule("dup"));
    assert!(!manager.remove_rule("dup"));
    assert!(manager.rules().is_empty());
}

// =============================================================================
// Silencing
// =============================================================================

#[test]
fn silence_suppresses_renotify_and_expires() {
    let (manager, seen) = recording_manager();
    manager
        .add_rule(
            AlertRule::new("error_rate", Severity::Critical, "errors above 5%", || true)
                .repeat_interval(Duration::from_secs(60)),
        )
        .unwrap();

    let t0 = Instant::now();
    assert_eq!(manager.evaluate_at(t0).fired, 1);
    assert_eq!(manager.silence("error_rate", Duration::from_secs(3600)), 1);

    let active = manager.get_active_alerts();
    assert_eq!(active[0].status, AlertStatus::Silenced);
    assert!(active[0].silenced_until.is_some());
    assert_eq!(manager.get_stats().silenced_alerts, 1);

    assert_eq!(manager.evaluate_at(t0 + Duration::from_secs(120)).renotified, 0);
    assert_eq!(seen.lock().len(), 1);

    manager.evaluate_at(t0 + Duration::from_secs(7200));
    let active = manager.get_active_alerts();
    assert_eq!(active[0].status, AlertStatus::Firing);
    assert!(active[0].silenced_until.is_none());
    assert_eq!(manager.get_stats().silenced_alerts, 0);
}

#[test]
fn unbounded_silence_never_expires() {
    let (manager, seen) = recording_manager();
    manager
        .add_rule(
            AlertRule::new("disk_smart_warning", Severity::Warning, "SMART pre-fail", || true)
                .repeat_interval(Duration::from_secs(60)),
        )
        .unwrap();

    let t0 = Instant::now();
    assert_eq!(manager.evaluate_at(t0).fired, 1);
    assert_eq!(manager.silence("disk_smart_warning", Duration::MAX), 1);

    for hours in [1u64, 24, 24 * 365] {
        let outcome = manager.evaluate_at(t0 + Duration::from_secs(hours * 3600));
        assert_eq!(outcome.renotified, 0);
        let active = manager.get_active_alerts();
        assert_eq!(active[0].status, AlertStatus::Silenced);
        assert!(active[0].silenced_until.is_none());
    }
    assert_eq!(seen.lock().len(), 1);

    assert_eq!(manager.resolve("disk_smart_warning", None), 1);
    assert!(manager.get_active_alerts().is_empty());
}

#[test]
fn silenced_alert_still_deduplicates() {
    let (manager, _) = recording_manager();
    manager.fire(Alert::new("backup_failed", Severity::Error, "nightly backup failed"));
    manager.silence("backup_failed", Duration::from_secs(60));
    assert!(!manager.fire(Alert::new("backup_failed", Severity::Error, "again")));
    assert_eq!(manager.silence("nothing_active", Duration::from_secs(60)), 0);
}

// =============================================================================
// Notifiers
// =============================================================================

#[test]
fn failing_notifiers_are_isolated() {
    let manager = AlertManager::default();
    let delivered = Arc::new(AtomicUsize::new(0));
    manager.add_notifier(Arc::new(FnNotifier::new("erroring", |_: &Alert| {
        Err(NotifyError::failed("erroring", "connection refused"))
    })));
    manager.add_notifier(Arc::new(FnNotifier::new("panicking", |_: &Alert| {
        panic!("webhook client crashed")
    })));
    let counter = delivered.clone();
    manager.add_notifier(Arc::new(FnNotifier::new("healthy", move |_: &Alert| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })));

    assert!(manager.fire(Alert::new("api_down", Severity::Critical, "health check failing")));
    assert_eq!(manager.resolve("api_down", None), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(manager.get_stats().notifiers, 3);
}

#[tokio::test]
async fn broadcast_notifier_delivers_to_subscribers() {
    let manager = AlertManager::default();
    let broadcast = Arc::new(BroadcastNotifier::new(16));
    let mut rx = broadcast.subscribe();
    manager.add_notifier(broadcast.clone());

    manager.fire(Alert::new("cert_expiry", Severity::Warning, "certificate expires in 7 days"));
    manager.resolve("cert_expiry", None);

    let fired = rx.recv().await.unwrap();
    assert_eq!(fired.name, "cert_expiry");
    assert_eq!(fired.status, AlertStatus::Firing);
    let resolved = rx.recv().await.unwrap();
    assert_eq!(resolved.id, fired.id);
    assert_eq!(resolved.status, AlertStatus::Resolved);
}

// =============================================================================
// Background Evaluation
// =============================================================================

#[test]
fn evaluator_runs_until_stopped() {
    let manager = Arc::new(AlertManager::default());
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    manager
        .add_rule(AlertRule::new("tick", Severity::Info, "tick", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        }))
        .unwrap();

    manager.start(Duration::from_millis(10)).unwrap();
    assert!(manager.is_running());
    assert!(matches!(
        manager.start(Duration::from_millis(10)),
        Err(AlertError::AlreadyRunning)
    ));

    std::thread::sleep(Duration::from_millis(100));
    manager.stop().unwrap();
    assert!(!manager.is_running());

    let after_stop = ticks.load(Ordering::SeqCst);
    assert!(after_stop >= 2);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    assert!(matches!(manager.stop(), Err(AlertError::NotRunning)));
}

#[test]
fn evaluator_fires_rule_in_background() {
    let manager = Arc::new(AlertManager::default());
    manager
        .add_rule(AlertRule::new("always", Severity::Warning, "always on", || true))
        .unwrap();
    manager.start(Duration::from_millis(5)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while manager.get_active_alerts().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    manager.stop().unwrap();
    assert_eq!(manager.get_active_alerts().len(), 1);
}
