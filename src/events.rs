//! Lifecycle events as an async stream.
//!
//! Observers (tests, admin endpoints, supervisors) can subscribe to the
//! executor's progress instead of scraping logs. Delivery is best-effort:
//! the executor never blocks on a slow or absent observer.

use std::pin::Pin;

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Default channel capacity for event streams.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Type alias for a boxed async stream of events.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A state transition observed by the lifecycle executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Initializing { unit: String },
    Initialized { unit: String },
    InitFailed { unit: String, reason: String },
    Running { unit: String },
    Exited {
        unit: String,
        code: i32,
        error: Option<String>,
    },
    ShutdownRequested { reason: String },
    Stopping { unit: String },
    Stopped { unit: String },
    Abandoned { unit: String },
}

impl LifecycleEvent {
    /// The unit this event concerns, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Initializing { unit }
            | Self::Initialized { unit }
            | Self::InitFailed { unit, .. }
            | Self::Running { unit }
            | Self::Exited { unit, .. }
            | Self::Stopping { unit }
            | Self::Stopped { unit }
            | Self::Abandoned { unit } => Some(unit),
            Self::ShutdownRequested { .. } => None,
        }
    }
}

/// A non-blocking sender for events.
#[derive(Debug)]
pub struct EventSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> EventSender<T> {
    /// Create a new event sender from an mpsc sender.
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Send an event without waiting; dropped when the channel is full or closed.
    pub fn emit(&self, event: T) {
        if let Err(e) = self.tx.try_send(event) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            debug!(reason, "lifecycle event dropped");
        }
    }

    /// Check if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Create a sender and stream pair with the given capacity.
pub fn event_channel<T: Send + 'static>(buffer_size: usize) -> (EventSender<T>, EventStream<T>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let stream: EventStream<T> = Box::pin(ReceiverStream::new(rx));
    (EventSender::new(tx), stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_event_channel() {
        let (sender, stream) = event_channel::<LifecycleEvent>(8);

        sender.emit(LifecycleEvent::Initializing { unit: "db".into() });
        sender.emit(LifecycleEvent::ShutdownRequested {
            reason: "test".into(),
        });
        drop(sender);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].unit(), Some("db"));
        assert_eq!(events[1].unit(), None);
    }

    #[tokio::test]
    async fn test_emit_never_blocks() {
        let (sender, stream) = event_channel::<u32>(1);
        sender.emit(1);
        sender.emit(2);
        drop(stream);
        assert!(sender.is_closed());
        sender.emit(3);
    }

    #[tokio::test]
    async fn test_sender_clone() {
        let (sender, stream) = event_channel::<u32>(4);

        let sender2 = sender.clone();
        sender.emit(1);
        sender2.emit(2);
        drop(sender);
        drop(sender2);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![1, 2]);
    }
}
