//! Media status events broadcast to connected clients.

use mediagate_common::CallerId;
use mediagate_db::models::MediaItem;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel capacity; slow subscribers lag rather than block publishers.
const EVENT_CAPACITY: usize = 256;

/// A change to a media item that UIs should reflect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MediaEvent {
    /// An item was accepted at intake and its plan applied.
    ItemCreated {
        #[serde(flatten)]
        item: MediaItem,
    },
    /// The tracker moved an item to a new status.
    StatusChanged {
        #[serde(flatten)]
        item: MediaItem,
    },
}

impl MediaEvent {
    pub fn item(&self) -> &MediaItem {
        match self {
            Self::ItemCreated { item } | Self::StatusChanged { item } => item,
        }
    }

    /// Whether this event may be shown to `caller`.
    pub fn visible_to(&self, caller: &CallerId) -> bool {
        &self.item().owner_id == caller
    }
}

/// Broadcast hub for [`MediaEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MediaEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MediaEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("No subscribers for event");
        }
    }
}
