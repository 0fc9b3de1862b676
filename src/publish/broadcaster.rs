//! Fan-out of packet events to in-process subscribers.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

use super::EventPublisher;
use crate::domain::PacketUpdate;
use crate::error::PublishError;

/// Events buffered per subscriber before new ones are dropped.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Receiving end handed to a subscriber: `(event name, payload)` pairs.
pub type Subscription = Receiver<(String, PacketUpdate)>;

/// Delivers every published event to all live subscribers.
///
/// Each subscriber has a bounded queue. While it is full, new events for
/// that subscriber are dropped; the publisher never blocks. Subscribers
/// whose receiver was dropped are pruned on the next publish. Publishing
/// with nobody listening is not an error.
#[derive(Debug)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<SyncSender<(String, PacketUpdate)>>>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

impl EventPublisher for Broadcaster {
    fn publish(&self, event: &str, update: &PacketUpdate) -> Result<(), PublishError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send((event.to_string(), update.clone())) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Subscriber queue full - dropping {}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        Ok(())
    }
}
