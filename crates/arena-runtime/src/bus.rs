//! Topic-based publish/subscribe bus for simulation output.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every event and a slow subscriber never blocks the simulation loop; it
//! lags instead.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::SensorData`] | Device output of subscribed agents, every tick |
//! | [`Topic::Truth`] | Global poses and footprints of every agent, every tick |
//! | [`Topic::Alerts`] | Stalls and device faults |

use arena_types::{Event, SimError};
use tokio::sync::broadcast;
use tracing::warn;

/// Events buffered per topic before slow subscribers start lagging.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Serialized device data of subscribed agents.
    SensorData,
    /// Snapshots of every agent for visualizers.
    Truth,
    /// Stall and fault notifications.
    Alerts,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::SensorData, Topic::Truth, Topic::Alerts];
}

/// Shared event bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    sensor_data: broadcast::Sender<Event>,
    truth: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus whose topic channels each buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sensor_data, _) = broadcast::channel(capacity);
        let (truth, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            sensor_data,
            truth,
            alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of subscribers handed the event, or
    /// [`SimError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, SimError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| SimError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Current number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SensorData => &self.sensor_data,
            Topic::Truth => &self.truth,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Receiver
// ─────────────────────────────────────────────────────────────────────────────

/// An async receiver bound to one [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Err(RecvError::Lagged(n))` means `n` events were dropped because this
    /// receiver fell behind; `Err(RecvError::Closed)` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Like [`recv`][Self::recv], but skips over lag and returns `None` only
    /// once the bus has shut down.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
