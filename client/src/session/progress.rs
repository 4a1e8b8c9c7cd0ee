//! Bridges a transfer's progress handle into discrete observer events.

use meshchat_transport::{ProgressHandle, ProgressSnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Discrete notifications derived from a progress handle. Consumers
/// recompute fraction-complete from the snapshot's unit counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// The completed-unit count moved.
    Changed(ProgressSnapshot),
    /// The cancellation flag transitioned true. Fired at most once.
    Cancelled,
    /// Derived completion: a count change reached total units. Fired at
    /// most once, and never for handles reporting zero total units.
    Completed,
}

/// Owns one subscription to a progress handle. The subscription is torn
/// down exactly once: either by [`SubscriptionToken::unsubscribe`] or by
/// dropping the token.
#[derive(Debug)]
pub struct SubscriptionToken {
    name: String,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(name = %self.name, "progress subscription released");
        }
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct ProgressObserver;

impl ProgressObserver {
    /// Subscribe to `handle`, receiving [`ProgressEvent`]s until the token
    /// is released or the transport drops its side of the handle. The
    /// observer task holds only the watch receiver, so it never keeps a
    /// finished transfer's state alive.
    pub fn subscribe(
        name: impl Into<String>,
        handle: &ProgressHandle,
    ) -> (SubscriptionToken, mpsc::UnboundedReceiver<ProgressEvent>) {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watch = handle.watch();
        // Baseline is fixed here, not when the task first runs: units
        // advanced before its first poll surface as a change instead of
        // being absorbed into the baseline.
        let baseline = watch.borrow().completed_units;

        let task = tokio::spawn(async move {
            let mut last_completed = baseline;
            let mut cancelled_fired = false;
            let mut completed_fired = false;

            while watch.changed().await.is_ok() {
                let snap = *watch.borrow_and_update();

                if snap.cancelled && !cancelled_fired {
                    cancelled_fired = true;
                    if tx.send(ProgressEvent::Cancelled).is_err() {
                        return;
                    }
                }

                if snap.completed_units != last_completed {
                    last_completed = snap.completed_units;
                    if tx.send(ProgressEvent::Changed(snap)).is_err() {
                        return;
                    }
                    if !completed_fired
                        && snap.total_units > 0
                        && snap.completed_units >= snap.total_units
                    {
                        completed_fired = true;
                        if tx.send(ProgressEvent::Completed).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        (
            SubscriptionToken {
                name,
                task: Some(task),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_fires_exactly_once_at_total() {
        let handle = ProgressHandle::new(100);
        let (_token, mut events) = ProgressObserver::subscribe("photo.jpg", &handle);

        handle.advance(40);
        handle.advance(60);

        let mut changed = 0;
        let mut completed = 0;
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Changed(snap) => {
                    changed += 1;
                    assert!(snap.completed_units <= 100);
                }
                ProgressEvent::Completed => {
                    completed += 1;
                    break;
                }
                ProgressEvent::Cancelled => panic!("unexpected cancellation"),
            }
        }
        assert!(changed >= 1);
        assert_eq!(completed, 1);

        // Further updates past total never re-fire Completed.
        handle.advance(1);
        tokio::task::yield_now().await;
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, ProgressEvent::Changed(_)));
        }
    }

    #[tokio::test]
    async fn advances_before_the_task_first_runs_are_delivered() {
        let handle = ProgressHandle::new(100);
        let (_token, mut events) = ProgressObserver::subscribe("photo.jpg", &handle);

        // The observer task has not been polled yet; these units must still
        // come through as a change rather than becoming the baseline.
        handle.advance(25);
        handle.advance(25);

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .expect("early advances were swallowed")
            .unwrap();
        match event {
            ProgressEvent::Changed(snap) => assert_eq!(snap.completed_units, 50),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_updates_never_fire_completed() {
        let handle = ProgressHandle::new(100);
        let (_token, mut events) = ProgressObserver::subscribe("photo.jpg", &handle);

        handle.advance(30);
        handle.advance(30);
        tokio::task::yield_now().await;

        let mut saw_changed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ProgressEvent::Changed(snap) => {
                    saw_changed = true;
                    assert!(snap.completed_units < snap.total_units);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_changed);
    }

    #[tokio::test]
    async fn zero_total_handles_never_complete() {
        let handle = ProgressHandle::new(0);
        let (_token, mut events) = ProgressObserver::subscribe("empty.bin", &handle);

        handle.advance(5);
        tokio::task::yield_now().await;

        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, ProgressEvent::Changed(_)));
        }
    }

    #[tokio::test]
    async fn cancellation_is_independent_of_count_changes() {
        let handle = ProgressHandle::new(100);
        let (_token, mut events) = ProgressObserver::subscribe("photo.jpg", &handle);

        handle.cancel();

        assert_eq!(events.recv().await, Some(ProgressEvent::Cancelled));
    }

    #[tokio::test]
    async fn channel_closes_when_transport_drops_the_handle() {
        let handle = ProgressHandle::new(10);
        let (_token, mut events) = ProgressObserver::subscribe("photo.jpg", &handle);

        handle.advance(10);
        drop(handle);

        let mut saw_completed = false;
        while let Some(event) = events.recv().await {
            if event == ProgressEvent::Completed {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let handle = ProgressHandle::new(100);
        let (token, mut events) = ProgressObserver::subscribe("photo.jpg", &handle);

        token.unsubscribe();
        tokio::task::yield_now().await;

        handle.advance(10);
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
    }
}
