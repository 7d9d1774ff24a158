use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Broadcast hub feeding the lobby SSE stream.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of connected lobby streams.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = SseHub::new(4);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.broadcast(ServerEvent {
            event: Some("room.created".into()),
            data: "{}".into(),
        });

        assert_eq!(first.recv().await.unwrap().event.as_deref(), Some("room.created"));
        assert_eq!(second.recv().await.unwrap().data, "{}");
    }

    #[test]
    fn broadcast_without_subscribers_is_dropped() {
        let hub = SseHub::new(4);
        hub.broadcast(ServerEvent {
            event: None,
            data: "lost".into(),
        });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
