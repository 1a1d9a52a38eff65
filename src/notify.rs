use dashmap::DashMap;
use serde_json::json;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Prefix of every LISTEN channel: `amenity_<ulid>`.
pub const CHANNEL_PREFIX: &str = "amenity_";

/// Broadcast hub for LISTEN/NOTIFY per amenity.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on one amenity. Creates the channel if needed.
    pub fn subscribe(&self, amenity_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(amenity_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, amenity_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&amenity_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel of a deleted amenity. Receivers see it closed.
    pub fn remove(&self, amenity_id: &Ulid) {
        self.channels.remove(amenity_id);
    }
}

pub fn channel_name(amenity_id: Ulid) -> String {
    format!("{CHANNEL_PREFIX}{amenity_id}")
}

/// Parse `amenity_<ulid>` (case-insensitive prefix, as Postgres folds idents).
pub fn parse_channel(channel: &str) -> Option<Ulid> {
    let prefix = channel.get(..CHANNEL_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(CHANNEL_PREFIX) {
        return None;
    }
    Ulid::from_string(&channel[CHANNEL_PREFIX.len()..].to_ascii_uppercase()).ok()
}

/// JSON payload delivered with NOTIFY.
pub fn payload(event: &Event) -> String {
    let mut body = json!({ "event": event.kind() });
    if let Some(amenity_id) = event.amenity_id() {
        body["amenity_id"] = json!(amenity_id.to_string());
    }
    match event {
        Event::ReservationCreated { reservation } => {
            body["reservation_id"] = json!(reservation.id.to_string());
            body["reservation_date"] = json!(reservation.date.to_string());
            body["status"] = json!(reservation.status.as_str());
        }
        Event::ReservationApproved { id, .. }
        | Event::ReservationRejected { id, .. }
        | Event::ReservationCancelled { id, .. } => {
            body["reservation_id"] = json!(id.to_string());
        }
        Event::ScheduleSet { entry } => {
            body["day_of_week"] = json!(entry.day_of_week);
        }
        Event::ScheduleRemoved { day_of_week, .. } => {
            body["day_of_week"] = json!(day_of_week);
        }
        _ => {}
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Amenity;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let aid = Ulid::new();
        let mut rx = hub.subscribe(aid);

        let event = Event::AmenityUpdated {
            amenity: Amenity::new(aid, Ulid::new(), "Pool"),
        };
        hub.send(aid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let aid = Ulid::new();
        hub.send(aid, &Event::AmenityDeleted { id: aid });
    }

    #[tokio::test]
    async fn removed_channel_closes_receivers() {
        let hub = NotifyHub::new();
        let aid = Ulid::new();
        let mut rx = hub.subscribe(aid);
        hub.remove(&aid);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn channel_names_round_trip_any_case() {
        let aid = Ulid::new();
        let name = channel_name(aid);
        assert_eq!(parse_channel(&name), Some(aid));
        assert_eq!(parse_channel(&name.to_lowercase()), Some(aid));
        assert_eq!(parse_channel("resource_01ARZ3NDEKTSV4RRFFQ69G5FAV"), None);
        assert_eq!(parse_channel("amenity_"), None);
    }

    #[test]
    fn payload_names_event_and_amenity() {
        let aid = Ulid::new();
        let rid = Ulid::new();
        let event = Event::ReservationCancelled { id: rid, amenity_id: aid, by: Ulid::new(), at: 0 };
        let v: serde_json::Value = serde_json::from_str(&payload(&event)).unwrap();
        assert_eq!(v["event"], event.kind());
        assert_eq!(v["amenity_id"], aid.to_string());
        assert_eq!(v["reservation_id"], rid.to_string());
    }
}
