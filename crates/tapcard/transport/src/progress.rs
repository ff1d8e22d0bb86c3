//! Human-readable progress messages
//!
//! Progress text is advisory. Publishing never blocks and never fails: with
//! no subscribers the message is dropped, and slow subscribers skip ahead.

use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered messages per subscriber
pub const DEFAULT_PROGRESS_CAPACITY: usize = 32;

/// A progress update for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMessage {
    /// Replace the current message
    Set(String),
    /// Append to the current message
    Append(String),
}

impl ProgressMessage {
    /// Get the message text
    pub fn text(&self) -> &str {
        match self {
            Self::Set(text) | Self::Append(text) => text,
        }
    }
}

/// Receiver side of a progress sink
pub type ProgressReceiver = broadcast::Receiver<ProgressMessage>;

/// Write-only fan-out of progress messages
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: broadcast::Sender<ProgressMessage>,
}

impl ProgressSink {
    /// Create a new sink buffering up to `capacity` messages per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to messages published from now on
    pub fn subscribe(&self) -> ProgressReceiver {
        self.sender.subscribe()
    }

    /// Replace the current message
    pub fn set(&self, message: impl Into<String>) {
        self.publish(ProgressMessage::Set(message.into()));
    }

    /// Append to the current message
    pub fn append(&self, message: impl Into<String>) {
        self.publish(ProgressMessage::Append(message.into()));
    }

    fn publish(&self, message: ProgressMessage) {
        trace!(message = message.text(), "Progress");
        // No subscribers is fine
        let _ = self.sender.send(message);
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let sink = ProgressSink::default();
        sink.set("nobody is listening");
        sink.append("still nobody");
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let sink = ProgressSink::new(4);
        let mut rx = sink.subscribe();

        sink.set("Card detected");
        sink.append("writing");

        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressMessage::Set("Card detected".into())
        );
        assert_eq!(rx.recv().await.unwrap().text(), "writing");
    }

    #[tokio::test]
    async fn slow_subscribers_drop_old_messages() {
        let sink = ProgressSink::new(2);
        let mut rx = sink.subscribe();

        for i in 0..5 {
            sink.set(format!("message {i}"));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap().text(), "message 3");
    }
}
