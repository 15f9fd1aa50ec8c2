//! Session event listeners
//!
//! Exactly one listener (the active screen or controller) receives the
//! session's events at a time. The session only keeps a weak reference; the
//! listener owns itself and deregisters when it goes away.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events delivered to the registered listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Link is open and ready for writes
    Connected,
    /// One decoded frame from the robot
    Read(String),
    /// A command accepted for sending, mirrored for display
    WriteEcho(String),
    /// Link ended; carries a short human readable reason
    Cancel(String),
    /// The listener's work finished normally
    Ok,
}

impl SessionEvent {
    /// Whether this event closes out delivery to the listener
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Cancel(_) | SessionEvent::Ok)
    }
}

/// Receiver of session events.
///
/// Called from the session's dispatch thread, in generation order. Calling
/// back into the session from `on_event` is allowed.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Sink forwarding events into an async channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    ///
    /// Keep the returned `Arc` alive for as long as events should flow.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: SessionEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(SessionEvent::Cancel(String::new()).is_terminal());
        assert!(SessionEvent::Ok.is_terminal());
        assert!(!SessionEvent::Connected.is_terminal());
        assert!(!SessionEvent::Read("5".into()).is_terminal());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_event(SessionEvent::Connected);
        sink.on_event(SessionEvent::Read("7".into()));
        assert_eq!(rx.recv().await, Some(SessionEvent::Connected));
        assert_eq!(rx.recv().await, Some(SessionEvent::Read("7".into())));
    }
}
