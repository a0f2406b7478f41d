use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking mutations, one channel per calendar date.
///
/// Watchers (wire `watch` op, external cache layers) subscribe to a date and
/// receive every event that touches a booking on that date. The engine
/// publishes on every successful mutation, so a listener can invalidate any
/// derived view the moment the underlying bookings change.
pub struct NotifyHub {
    channels: DashMap<NaiveDate, broadcast::Sender<Event>>,
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

    /// Subscribe to mutations on a date. Creates the channel if needed.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, date: NaiveDate, event: &Event) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;
    use ulid::Ulid;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 15).unwrap()
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(date());

        let event = Event::StatusChanged {
            id: Ulid::new(),
            status: BookingStatus::Cancelled,
        };
        hub.send(date(), &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(date(), &Event::BookingDeleted { id: Ulid::new() });
    }

    #[tokio::test]
    async fn dates_are_isolated() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(date());
        let other = NaiveDate::from_ymd_opt(2024, 12, 16).unwrap();

        hub.send(other, &Event::BookingDeleted { id: Ulid::new() });
        assert!(rx.try_recv().is_err());
    }
}
