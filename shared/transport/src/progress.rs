//! Shared progress state for one in-flight resource transfer.

use std::sync::Arc;
use tokio::sync::watch;

/// Point-in-time view of a transfer's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed_units: u64,
    pub total_units: u64,
    pub cancelled: bool,
}

impl ProgressSnapshot {
    pub fn fraction_completed(&self) -> f64 {
        if self.total_units == 0 {
            0.0
        } else {
            self.completed_units as f64 / self.total_units as f64
        }
    }
}

/// Handle onto the progress of one transfer. Clones all view the same
/// transfer; updates are broadcast to every watcher.
#[derive(Clone)]
pub struct ProgressHandle {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProgressHandle").field(&self.snapshot()).finish()
    }
}

impl ProgressHandle {
    pub fn new(total_units: u64) -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot {
            completed_units: 0,
            total_units,
            cancelled: false,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Set the absolute completed-unit count. Counts never move backwards;
    /// a lower value than the current one is ignored.
    pub fn set_completed(&self, units: u64) {
        self.tx.send_if_modified(|snap| {
            if units > snap.completed_units {
                snap.completed_units = units;
                true
            } else {
                false
            }
        });
    }

    /// Advance the completed-unit count by `delta`.
    pub fn advance(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.tx.send_modify(|snap| {
            snap.completed_units = snap.completed_units.saturating_add(delta);
        });
    }

    /// Raise the cancellation flag. Idempotent; watchers observe the
    /// transition at most once.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|snap| {
            if snap.cancelled {
                false
            } else {
                snap.cancelled = true;
                true
            }
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.tx.borrow()
    }

    pub fn fraction_completed(&self) -> f64 {
        self.snapshot().fraction_completed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.snapshot().cancelled
    }

    /// Subscribe to snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_accumulates_and_reports_fraction() {
        let handle = ProgressHandle::new(100);
        handle.advance(25);
        handle.advance(25);

        let snap = handle.snapshot();
        assert_eq!(snap.completed_units, 50);
        assert!((handle.fraction_completed() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn set_completed_never_moves_backwards() {
        let handle = ProgressHandle::new(10);
        handle.set_completed(7);
        handle.set_completed(3);
        assert_eq!(handle.snapshot().completed_units, 7);
    }

    #[test]
    fn zero_total_fraction_is_zero() {
        let handle = ProgressHandle::new(0);
        assert_eq!(handle.fraction_completed(), 0.0);
    }

    #[tokio::test]
    async fn watchers_observe_cancellation_once() {
        let handle = ProgressHandle::new(10);
        let mut rx = handle.watch();

        handle.cancel();
        handle.cancel();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().cancelled);
        // Second cancel was a no-op, nothing further pending.
        assert!(!rx.has_changed().unwrap());
    }
}
