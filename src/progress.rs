//! Progress events emitted while models load and images are processed.
//!
//! Subscribers receive `{message, percent}` events over a broadcast channel
//! and may drop their receiver at any time; emitting never blocks and never
//! fails when nobody is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    /// 0 to 100
    pub percent: u8,
}

#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSender {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, message: impl Into<String>, percent: u8) {
        let event = ProgressEvent {
            message: message.into(),
            percent: percent.min(100),
        };
        tracing::debug!(percent = event.percent, "{}", event.message);
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let progress = ProgressSender::new();
        let mut rx = progress.subscribe();

        progress.emit("loading", 10);
        progress.emit("done", 250);

        assert_eq!(rx.recv().await.unwrap().percent, 10);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.message, "done");
        assert_eq!(last.percent, 100);
    }

    #[test]
    fn test_emit_without_subscribers() {
        ProgressSender::new().emit("nobody listens", 50);
    }

    #[test]
    fn test_emit_wakes_waiting_subscriber() {
        use tokio_test::{assert_pending, assert_ready, task};

        let progress = ProgressSender::new();
        let mut rx = progress.subscribe();
        let mut recv = task::spawn(rx.recv());

        assert_pending!(recv.poll());
        progress.emit("step", 20);
        assert!(recv.is_woken());
        let event = assert_ready!(recv.poll()).unwrap();
        assert_eq!(event.percent, 20);
    }
}
