//! Destination for user-visible text.

use tokio::sync::mpsc;

/// Receives server text and background status/error messages.
///
/// `deliver` is called from the receiving and sending tasks and must
/// return without waiting on anything slow.
pub trait MessageSink: Send + Sync + 'static {
    fn deliver(&self, text: String);
}

/// Forwards every message into an unbounded channel, typically drained
/// by a printer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn deliver(&self, text: String) {
        // Printer gone means nobody is left to read it.
        let _ = self.tx.send(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.deliver("one".into());
        sink.deliver("two".into());
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[test]
    fn deliver_after_receiver_dropped_is_silent() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.deliver("nobody listening".into());
    }
}
