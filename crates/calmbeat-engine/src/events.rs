//! Outbound notifications for presentation collaborators.
//!
//! Consumers either register a callback, which stays registered until it
//! is explicitly unsubscribed or the hub is cleared, or take a broadcast
//! receiver, which unsubscribes itself when dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::overwhelm::OverwhelmReason;

/// Discrete signals emitted by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A beat ticked
    BeatPulse { index: u64, bpm: f64 },
    /// A section was completed for the first time
    SectionCompleted { index: usize },
    /// Every section is complete
    SessionCompleted,
    /// The player became overwhelmed
    OverwhelmBegan { reason: OverwhelmReason },
    /// The player recovered
    CalmRestored,
    /// The idle player could use a nudge
    IdleEncouragement,
    /// Tempo was raised after a run of hits
    TempoChanged { bpm: f64 },
}

/// Handle returned by [`EventHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&SessionEvent) + Send>;

/// Fan-out of session events to callbacks and channel receivers
pub struct EventHub {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback)>,
    channel: Option<broadcast::Sender<SessionEvent>>,
    published: u64,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
            channel: None,
            published: 0,
        }
    }

    /// Register a callback invoked synchronously for every event
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(existing, _)| *existing != id);
        self.callbacks.len() != before
    }

    /// Receive events through a broadcast channel.
    ///
    /// The first call sets the channel capacity; a receiver that falls more
    /// than `capacity` events behind observes a lag error and skips ahead.
    pub fn channel(&mut self, capacity: usize) -> broadcast::Receiver<SessionEvent> {
        match &self.channel {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(capacity.max(1));
                self.channel = Some(sender);
                receiver
            }
        }
    }

    pub fn publish(&mut self, event: SessionEvent) {
        self.published += 1;

        for (_, callback) in self.callbacks.iter_mut() {
            callback(&event);
        }

        if let Some(sender) = &self.channel {
            // No live receivers is not an error
            let _ = sender.send(event);
        }
    }

    /// Registered callbacks plus live channel receivers
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.len() + self.channel.as_ref().map_or(0, |s| s.receiver_count())
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Drop every callback and close the channel
    pub fn clear(&mut self) {
        self.callbacks.clear();
        self.channel = None;
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("callbacks", &self.callbacks.len())
            .field("channel", &self.channel.is_some())
            .field("published", &self.published)
            .finish()
    }
}
