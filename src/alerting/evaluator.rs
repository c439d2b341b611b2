//! Background rule evaluation on a dedicated thread.
//!
//! The thread holds only a weak reference to the manager and never holds
//! a lock while it waits, so dropping the last manager handle ends the
//! loop at the next tick.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::manager::{AlertError, AlertManager};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }

    /// Wait up to `timeout`; returns `true` once stop was requested. A
    /// timeout past the representable clock waits for stop alone.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cv.wait(&mut stopped),
            }
        }
        *stopped
    }
}

pub(super) struct EvaluatorHandle {
    signal: Arc<StopSignal>,
    done: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

impl EvaluatorHandle {
    pub(super) fn signal_stop(&self) {
        self.signal.stop();
    }
}

fn run(manager: Weak<AlertManager>, signal: Arc<StopSignal>, interval: Duration) {
    loop {
        match manager.upgrade() {
            Some(manager) => {
                manager.evaluate();
            }
            None => break,
        }
        if signal.wait(interval) {
            break;
        }
    }
}

impl AlertManager {
    /// Start evaluating rules every `interval` on a background thread.
    /// Evaluation runs once immediately.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<(), AlertError> {
        let mut slot = self.evaluator.lock();
        if slot.is_some() {
            return Err(AlertError::AlreadyRunning);
        }

        let interval = interval.max(MIN_INTERVAL);
        let signal = Arc::new(StopSignal::default());
        let (done_tx, done) = mpsc::channel();
        let weak = Arc::downgrade(self);
        let thread_signal = signal.clone();

        let thread = std::thread::Builder::new()
            .name("alert-evaluator".to_string())
            .spawn(move || {
                run(weak, thread_signal, interval);
                let _ = done_tx.send(());
            })
            .map_err(|e| AlertError::Spawn(e.to_string()))?;

        tracing::info!(interval_ms = interval.as_millis() as u64, "alert evaluator started");
        *slot = Some(EvaluatorHandle {
            signal,
            done,
            thread,
        });
        Ok(())
    }

    /// Start with the configured evaluation interval.
    pub fn start_default(self: &Arc<Self>) -> Result<(), AlertError> {
        self.start(self.config().evaluation_interval)
    }

    /// Stop the evaluator, waiting up to the configured stop timeout for an
    /// in-flight pass to finish. A thread that overruns is detached.
    pub fn stop(&self) -> Result<(), AlertError> {
        let handle = self.evaluator.lock().take().ok_or(AlertError::NotRunning)?;
        handle.signal.stop();

        match handle.done.recv_timeout(self.config().stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.thread.join();
                tracing::info!("alert evaluator stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.config().stop_timeout.as_millis() as u64,
                    "alert evaluator did not stop in time; detaching"
                );
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.evaluator.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{AlertRule, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_start_stop() {
        let manager = Arc::new(AlertManager::default());
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = ticks.clone();
        manager
            .add_rule(AlertRule::new("tick", Severity::Info, "m", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                false
            }))
            .unwrap();

        manager.start(Duration::from_millis(5)).unwrap();
        assert!(manager.is_running());
        assert!(matches!(
            manager.start(Duration::from_millis(5)),
            Err(AlertError::AlreadyRunning)
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        manager.stop().unwrap();
        assert!(!manager.is_running());
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert!(matches!(manager.stop(), Err(AlertError::NotRunning)));
    }

    #[test]
    fn test_stop_signal_wakes_waiter() {
        let signal = Arc::new(StopSignal::default());
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(10));
        signal.stop();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_unbounded_wait_ends_on_stop() {
        let signal = Arc::new(StopSignal::default());
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || waiter.wait(Duration::MAX));
        std::thread::sleep(Duration::from_millis(10));
        signal.stop();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_huge_interval_evaluates_once_and_stops() {
        let manager = Arc::new(AlertManager::default());
        manager
            .add_rule(AlertRule::new("always", Severity::Warning, "m", || true))
            .unwrap();
        manager.start(Duration::MAX).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.get_active_alerts().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.get_active_alerts().len(), 1);
        manager.stop().unwrap();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_wait_times_out() {
        let signal = StopSignal::default();
        assert!(!signal.wait(Duration::from_millis(5)));
    }
}
