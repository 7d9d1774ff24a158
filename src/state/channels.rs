use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{dto::ws::ServerMessage, state::room::RoomKey};

const ROOM_CHANNEL_CAPACITY: usize = 64;

/// Per-room broadcast channels backing the `game_type:room_code` namespaces.
pub struct RoomChannels {
    channels: DashMap<RoomKey, broadcast::Sender<ServerMessage>>,
}

impl RoomChannels {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to the room's namespace, creating it on first use.
    pub fn subscribe(&self, key: &RoomKey) -> broadcast::Receiver<ServerMessage> {
        self.channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a message to every subscriber of the room. Returns the number of receivers.
    pub fn publish(&self, key: &RoomKey, message: ServerMessage) -> usize {
        self.channels
            .get(key)
            .and_then(|sender| sender.send(message).ok())
            .unwrap_or(0)
    }

    /// Drop the namespace once nobody listens anymore.
    pub fn cleanup(&self, key: &RoomKey) {
        self.channels
            .remove_if(key, |_, sender| sender.receiver_count() == 0);
    }
}

impl Default for RoomChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::GameType;

    fn abandoned(code: &str) -> ServerMessage {
        ServerMessage::RoomAbandoned {
            room_code: code.into(),
            refunded: true,
        }
    }

    #[tokio::test]
    async fn messages_stay_inside_their_namespace() {
        let channels = RoomChannels::new();
        let cards = RoomKey::new(GameType::Cards, "111111");
        let bingo = RoomKey::new(GameType::Bingo, "111111");

        let mut cards_rx = channels.subscribe(&cards);
        let mut bingo_rx = channels.subscribe(&bingo);

        assert_eq!(channels.publish(&cards, abandoned("111111")), 1);
        assert!(matches!(
            cards_rx.recv().await.unwrap(),
            ServerMessage::RoomAbandoned { refunded: true, .. }
        ));
        assert!(bingo_rx.try_recv().is_err());
    }

    #[test]
    fn cleanup_keeps_listened_channels() {
        let channels = RoomChannels::new();
        let key = RoomKey::new(GameType::Cards, "222222");
        let rx = channels.subscribe(&key);

        channels.cleanup(&key);
        assert_eq!(channels.publish(&key, abandoned("222222")), 1);

        drop(rx);
        channels.cleanup(&key);
        assert_eq!(channels.publish(&key, abandoned("222222")), 0);
    }
}
