use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;
const CHANNEL_PREFIX: &str = "vehicle_";

/// LISTEN channel name for a vehicle.
pub fn channel_name(vehicle_id: Ulid) -> String {
    format!("{CHANNEL_PREFIX}{vehicle_id}")
}

/// Vehicle id from a `vehicle_<ULID>` channel name.
pub fn parse_channel(channel: &str) -> Option<Ulid> {
    channel
        .strip_prefix(CHANNEL_PREFIX)
        .and_then(|id| Ulid::from_string(id).ok())
}

/// JSON body of a notification: `{"kind": ..., "event": {...}}`.
pub fn payload(event: &Event) -> String {
    serde_json::json!({
        "kind": event.kind(),
        "event": event,
    })
    .to_string()
}

/// Broadcast hub for LISTEN/NOTIFY per vehicle.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a vehicle's events. Creates the channel if needed.
    pub fn subscribe(&self, vehicle_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, vehicle_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a vehicle's channel; subscribers see it closed.
    pub fn remove(&self, vehicle_id: &Ulid) {
        self.channels.remove(vehicle_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
