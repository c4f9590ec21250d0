//! Event system for progress tracking
//!
//! An in-process bus built on `tokio::sync::broadcast`. The mirror engine
//! emits events while it works; any number of subscribers (the CLI spinner,
//! log sinks, tests) can listen.
//!
//! Emitting never blocks: with no subscribers the event is dropped, and a
//! lagging subscriber loses its oldest events rather than slowing the pass.
//!
//! ```
//! use libmirrorcast::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::PassStarted { account: "alice".to_string() });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before old events are dropped
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Progress of a mirroring pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PassStarted {
        account: String,
    },

    PostMirrored {
        account: String,
        source_id: String,
        destination_id: String,
    },

    /// Already mirrored on an earlier run
    PostSkipped {
        account: String,
        source_id: String,
    },

    AttachmentDropped {
        account: String,
        source_id: String,
        url: String,
        reason: String,
    },

    PinChanged {
        account: String,
        /// Source id of the new pin, `None` when unpinned
        source_id: Option<String>,
        destination_id: Option<String>,
    },

    PassCompleted {
        account: String,
        mirrored: usize,
        skipped: usize,
    },

    PassFailed {
        account: String,
        error: String,
    },
}

impl Event {
    pub fn account(&self) -> &str {
        match self {
            Event::PassStarted { account }
            | Event::PostMirrored { account, .. }
            | Event::PostSkipped { account, .. }
            | Event::AttachmentDropped { account, .. }
            | Event::PinChanged { account, .. }
            | Event::PassCompleted { account, .. }
            | Event::PassFailed { account, .. } => account,
        }
    }

    /// Whether this event ends a pass
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::PassCompleted { .. } | Event::PassFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_block() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        bus.emit(Event::PassStarted {
            account: "alice".to_string(),
        });
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_events() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = Event::PostMirrored {
            account: "alice".to_string(),
            source_id: "1".to_string(),
            destination_id: "d1".to_string(),
        };
        bus.emit(event.clone());

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_loses_oldest() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for i in 0..5 {
            bus.emit(Event::PostSkipped {
                account: "alice".to_string(),
                source_id: i.to_string(),
            });
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::PassCompleted {
            account: "alice".to_string(),
            mirrored: 3,
            skipped: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pass_completed");
        assert_eq!(json["mirrored"], 3);
    }

    #[test]
    fn test_account_and_terminal() {
        let failed = Event::PassFailed {
            account: "bob".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(failed.account(), "bob");
        assert!(failed.is_terminal());
        assert!(!Event::PassStarted {
            account: "bob".to_string()
        }
        .is_terminal());
    }
}
