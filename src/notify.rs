use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for calendar changes, one channel per salesperson.
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

    /// Subscribe to a salesperson's calendar. Creates the channel if needed.
    /// A slow receiver sees `RecvError::Lagged` rather than blocking writers.
    pub fn subscribe(&self, salesperson_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(salesperson_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, salesperson_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&salesperson_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the salesperson is deleted).
    pub fn remove(&self, salesperson_id: &Ulid) {
        self.channels.remove(salesperson_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let sp = Ulid::new();
        let mut rx = hub.subscribe(sp);

        let event = Event::AppointmentCancelled {
            id: Ulid::new(),
            salesperson_id: sp,
        };
        hub.send(sp, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn other_salespeople_are_not_heard() {
        let hub = NotifyHub::new();
        let (mine, theirs) = (Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(mine);
        let _other = hub.subscribe(theirs);

        hub.send(theirs, &Event::AssignmentRecorded { salesperson_id: theirs });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let sp = Ulid::new();
        // No subscriber, should not panic
        hub.send(sp, &Event::SalespersonDeleted { id: sp });
        hub.remove(&sp);
    }
}
