use dashmap::DashMap;
use futures::{stream, Stream};
use tokio::sync::broadcast;
use tracing::warn;
use ulid::Ulid;

use crate::ports::EventBus;
use crate::status::StatusEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for status events: one firehose plus per-entity channels.
pub struct NotifyHub {
    all: broadcast::Sender<StatusEvent>,
    channels: DashMap<Ulid, broadcast::Sender<StatusEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Every event, for dispatchers such as mail/SMS or analytics.
    pub fn subscribe_all(&self) -> broadcast::Receiver<StatusEvent> {
        self.all.subscribe()
    }

    /// Events about one booking or payment. Creates the channel if needed.
    pub fn subscribe(&self, entity_id: Ulid) -> broadcast::Receiver<StatusEvent> {
        let sender = self
            .channels
            .entry(entity_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Firehose as a stream. A subscriber that falls behind skips the
    /// events it missed instead of ending the stream.
    pub fn stream_all(&self) -> impl Stream<Item = StatusEvent> + Send + 'static {
        stream::unfold(self.all.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event stream lagged, skipped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Drop an entity channel, e.g. once the booking is archived.
    pub fn remove(&self, entity_id: &Ulid) {
        self.channels.remove(entity_id);
    }
}

impl EventBus for NotifyHub {
    /// No-op if nobody is listening.
    fn publish(&self, event: &StatusEvent) {
        let _ = self.all.send(event.clone());
        if let Some(sender) = self.channels.get(&event.entity_id()) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{BookingStatus, Transition};

    fn changed(id: Ulid) -> StatusEvent {
        StatusEvent::BookingStatusChanged(Transition {
            entity_id: id,
            from: BookingStatus::Pending,
            to: BookingStatus::Confirmed,
            is_new: false,
        })
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        let mut rx = hub.subscribe(id);
        let mut all = hub.subscribe_all();

        let event = changed(id);
        hub.publish(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(all.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn entity_channel_is_filtered() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let mut rx = hub.subscribe(watched);

        hub.publish(&changed(Ulid::new()));
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn stream_survives_lag() {
        use futures::StreamExt;

        let hub = NotifyHub::new();
        let stream = hub.stream_all();
        futures::pin_mut!(stream);

        let last = Ulid::new();
        for _ in 0..CHANNEL_CAPACITY + 8 {
            hub.publish(&changed(Ulid::new()));
        }
        hub.publish(&changed(last));

        let mut received = 0;
        while let Some(event) = stream.next().await {
            received += 1;
            if event.entity_id() == last {
                break;
            }
        }
        assert_eq!(received, CHANNEL_CAPACITY);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(&changed(Ulid::new()));
        hub.remove(&Ulid::new());
    }
}
