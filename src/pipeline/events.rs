//! Progress events published by the pipeline service over a broadcast
//! channel, since subscribers here are UI/CLI progress bars rather than a
//! single collector — a slow subscriber lags and has old events dropped
//! instead of backpressuring the workers.

use tokio::sync::broadcast;

/// A progress notification. One worker can fan these out to any number of
/// subscribers (a CLI progress bar, a status dashboard) without the workers
/// ever blocking on a subscriber that falls behind.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    TaskStarted {
        task_id: String,
        worker_id: usize,
        operation: &'static str,
    },
    TaskProgress {
        task_id: String,
        worker_id: usize,
        message: String,
    },
    TaskCompleted {
        task_id: String,
        worker_id: usize,
    },
    TaskFailed {
        task_id: String,
        worker_id: usize,
        error: String,
        will_retry: bool,
    },
    BulkProgress {
        bulk_id: String,
        succeeded: i32,
        failed: i32,
        total: i32,
    },
}

const CHANNEL_CAPACITY: usize = 256;

/// Thin wrapper around a `broadcast::Sender` that never errors on publish —
/// an event published with no subscribers connected is simply dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        // A publish with zero subscribers returns Err(SendError); that's
        // the expected steady state for a headless run, not a fault.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publisher() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(ProgressEvent::TaskCompleted {
                task_id: format!("t{i}"),
                worker_id: 0,
            });
        }
        // The receiver is behind; it should observe a Lagged error rather
        // than the publisher ever having blocked.
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(ProgressEvent::TaskStarted {
            task_id: "t1".into(),
            worker_id: 0,
            operation: "ocr",
        });
    }
}
