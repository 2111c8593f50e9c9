//! Playout event types and the in-process event bus
//!
//! Components publish lifecycle and fault events here so that supervisory
//! layers (control protocol, monitoring UI) can observe the pipeline without
//! reaching into its state. Publishing never blocks: the bus is a tokio
//! broadcast channel and events for lagging subscribers are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the playout pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayoutEvent {
    ChannelStarted {
        channel_id: Uuid,
        format: String,
        timestamp: DateTime<Utc>,
    },
    ChannelStopped {
        channel_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    LayerLoaded {
        channel_id: Uuid,
        layer: i32,
        producer: String,
        auto_play: bool,
        timestamp: DateTime<Utc>,
    },
    ConsumerAdded {
        channel_id: Uuid,
        consumer: String,
        timestamp: DateTime<Utc>,
    },
    ConsumerRemoved {
        channel_id: Uuid,
        consumer: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`PlayoutEvent`]s.
///
/// Cloneable handle; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayoutEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` in-flight events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Publish an event. Succeeds even with no subscribers.
    pub fn publish(&self, event: PlayoutEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayoutEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
