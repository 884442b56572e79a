//! Progress fan-out.
//!
//! Every state change of a session is published as a snapshot. Snapshots go
//! out on a broadcast channel (for streaming observers) and a watch channel
//! that only keeps the latest one (for waiters).

use crate::{SessionHandle, SessionSnapshot};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct ProgressHub {
    events: broadcast::Sender<SessionSnapshot>,
    latest: watch::Sender<Option<SessionSnapshot>>,
}

impl ProgressHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (latest, _) = watch::channel(None);
        Self { events, latest }
    }

    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        self.latest.send_replace(Some(snapshot.clone()));
        // No receivers is not an error
        let _ = self.events.send(snapshot);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Option<SessionSnapshot>> {
        self.latest.subscribe()
    }
}

/// Delivery of one session's snapshots to a callback.
///
/// Delivery stops on [`Subscription::unsubscribe`], when the subscription is
/// dropped, or once the session settles into `idle`, `success` or `error`.
#[must_use = "dropping a subscription stops delivery"]
pub struct Subscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn<F>(
        mut events: broadcast::Receiver<SessionSnapshot>,
        handle: SessionHandle,
        callback: F,
    ) -> Self
    where
        F: Fn(&SessionSnapshot) + Send + 'static,
    {
        let token = CancellationToken::new();
        let stop = token.clone();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(snapshot) => snapshot,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(session_id = %handle.id, skipped, "Progress subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                if snapshot.id != handle.id {
                    continue;
                }
                if stop.is_cancelled() {
                    break;
                }
                callback(&snapshot);

                if !snapshot.status.is_active() {
                    break;
                }
            }
        });

        Self { token, task }
    }

    /// Stop delivery.
    pub fn unsubscribe(self) {
        self.token.cancel();
    }

    /// Whether delivery has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionStatus, SyncSession};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn latest_snapshot_is_kept() {
        let hub = ProgressHub::new(4);
        let watcher = hub.watch();
        assert!(watcher.borrow().is_none());

        let session = SyncSession::start();
        hub.publish(session.clone());
        assert_eq!(watcher.borrow().as_ref().map(|s| s.id), Some(session.id));
    }

    #[tokio::test]
    async fn subscription_filters_by_session_and_stops_when_settled() {
        let hub = ProgressHub::new(16);
        let mut session = SyncSession::start();
        let other = SyncSession::start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = Subscription::spawn(hub.subscribe(), session.handle(), move |s| {
            sink.lock().unwrap().push(s.progress)
        });

        session.record_progress(10, 1, 10, None);
        hub.publish(session.clone());
        hub.publish(other);
        session.record_progress(100, 10, 10, None);
        session.transition(SessionStatus::Success, "complete").unwrap();
        hub.publish(session.clone());
        hub.publish(session);

        subscription.task_finished().await;
        assert_eq!(*seen.lock().unwrap(), vec![10, 100]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = ProgressHub::new(16);
        let session = SyncSession::start();

        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let subscription = Subscription::spawn(hub.subscribe(), session.handle(), move |_| {
            *sink.lock().unwrap() += 1
        });
        subscription.unsubscribe();
        tokio::task::yield_now().await;

        hub.publish(session);
        tokio::task::yield_now().await;
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    impl Subscription {
        async fn task_finished(mut self) {
            (&mut self.task).await.unwrap();
        }
    }
}
