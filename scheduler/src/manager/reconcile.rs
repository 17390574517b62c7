//! Reconciliation bookkeeping for tick steps 1–2 (`prepareReconciliation`,
//! `reconcileTasks`). Tracked outside the durable document — operational
//! state, not part of the committed plan/current (spec supplement,
//! grounded in the original's `ArangoManager::_reconciliationTasks`).
//!
//! Uses `std::time::Instant`, a monotonic clock, never wall time (spec
//! design note on the backoff clock).

use scheduler_common::wait::backoff_full_jitter;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReconcileEntry {
    pub node_id: String,
    pub next_reconcile: Instant,
    pub backoff: Duration,
}

/// Per-task explicit-reconcile schedule, plus the implicit full-reconcile
/// timer.
pub struct ReconcileBook {
    entries: HashMap<String, ReconcileEntry>,
    base: Duration,
    cap: Duration,
    implicit_interval: Duration,
    next_implicit: Instant,
}

impl ReconcileBook {
    pub fn new(base: Duration, cap: Duration, implicit_interval: Duration, now: Instant) -> Self {
        ReconcileBook {
            entries: HashMap::new(),
            base,
            cap,
            implicit_interval,
            next_implicit: now + implicit_interval,
        }
    }

    /// `prepareReconciliation`: schedule an explicit reconcile for a task
    /// not already tracked, at the base backoff.
    pub fn schedule(&mut self, task_id: &str, node_id: &str, now: Instant) {
        self.entries.entry(task_id.to_string()).or_insert_with(|| ReconcileEntry {
            node_id: node_id.to_string(),
            next_reconcile: now + self.base,
            backoff: self.base,
        });
    }

    /// Clears bookkeeping for a task that reported a definitive status.
    pub fn clear(&mut self, task_id: &str) {
        self.entries.remove(task_id);
    }

    /// Tasks whose reconcile is due now; doubles (capped) and reschedules
    /// each one returned, using full-jitter backoff.
    pub fn due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for (task_id, entry) in self.entries.iter_mut() {
            if entry.next_reconcile <= now {
                due.push(task_id.clone());
                let doubled = entry.backoff.saturating_mul(2).min(self.cap);
                entry.backoff = doubled;
                entry.next_reconcile = now + backoff_full_jitter(doubled, doubled, 0).max(Duration::from_millis(1));
            }
        }
        due
    }

    /// True (and resets the timer) once the implicit-reconciliation
    /// interval has elapsed.
    pub fn implicit_due(&mut self, now: Instant) -> bool {
        if now >= self.next_implicit {
            self.next_implicit = now + self.implicit_interval;
            true
        } else {
            false
        }
    }

    pub fn backoff_of(&self, task_id: &str) -> Option<Duration> {
        self.entries.get(task_id).map(|e| e.backoff)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_twice_does_not_reset_backoff() {
        let now = Instant::now();
        let mut book = ReconcileBook::new(Duration::from_secs(1), Duration::from_secs(60), Duration::from_secs(300), now);
        book.schedule("t1", "n1", now);
        let due = book.due(now + Duration::from_secs(2));
        assert_eq!(due, vec!["t1".to_string()]);
        book.schedule("t1", "n1", now + Duration::from_secs(2));
        assert_eq!(book.backoff_of("t1"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn backoff_is_monotonically_non_decreasing_and_capped() {
        let now = Instant::now();
        let mut book = ReconcileBook::new(Duration::from_secs(1), Duration::from_secs(8), Duration::from_secs(300), now);
        book.schedule("t1", "n1", now);
        let mut t = now;
        let mut last = Duration::from_secs(0);
        for _ in 0..6 {
            t += Duration::from_secs(60);
            book.due(t);
            let current = book.backoff_of("t1").unwrap();
            assert!(current >= last);
            last = current;
        }
        assert!(last <= Duration::from_secs(8));
    }

    #[test]
    fn clear_removes_tracking_for_a_task() {
        let now = Instant::now();
        let mut book = ReconcileBook::new(Duration::from_secs(1), Duration::from_secs(60), Duration::from_secs(300), now);
        book.schedule("t1", "n1", now);
        book.clear("t1");
        assert!(book.is_empty());
    }

    #[test]
    fn implicit_reconciliation_fires_once_per_interval() {
        let now = Instant::now();
        let mut book = ReconcileBook::new(Duration::from_secs(1), Duration::from_secs(60), Duration::from_secs(10), now);
        assert!(!book.implicit_due(now + Duration::from_secs(5)));
        assert!(book.implicit_due(now + Duration::from_secs(11)));
        assert!(!book.implicit_due(now + Duration::from_secs(12)));
    }
}
