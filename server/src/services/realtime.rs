//! Live slot-status fan-out.
//!
//! One `tokio::sync::broadcast` channel per facility. Delivery is best
//! effort: publishing with no subscribers drops the event and lagging
//! receivers skip what they missed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::models::{Slot, SlotStatus};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotUpdate {
    pub facility_id: Uuid,
    pub slot_id: Uuid,
    pub slot_number: String,
    pub status: SlotStatus,
}

impl From<&Slot> for SlotUpdate {
    fn from(slot: &Slot) -> Self {
        Self {
            facility_id: slot.facility_id,
            slot_id: slot.id,
            slot_number: slot.slot_number.clone(),
            status: slot.status,
        }
    }
}

#[derive(Clone, Default)]
pub struct SlotBroadcaster {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<SlotUpdate>>>>,
}

impl SlotBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, update: SlotUpdate) {
        let channels = self.channels.read().await;
        match channels.get(&update.facility_id) {
            Some(sender) => {
                let receivers = sender.send(update).unwrap_or(0);
                tracing::debug!(receivers, "Broadcast slot update");
            }
            None => tracing::trace!(facility_id = %update.facility_id, "No listeners for facility"),
        }
    }

    pub async fn subscribe(&self, facility_id: Uuid) -> broadcast::Receiver<SlotUpdate> {
        let mut channels = self.channels.write().await;
        channels
            .entry(facility_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drops channels nobody listens to anymore.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub async fn facility_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
