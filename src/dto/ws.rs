use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    dto::room::RoomView,
    services::payout::Share,
    state::room::{CancelReason, GameType},
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from room WebSocket clients.
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Identify the socket and register presence in the room.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: String, user_id: String },
    /// Game-specific move payload, validated by the server-side rules.
    Move {
        #[schema(value_type = Object)]
        payload: Value,
    },
    /// Leave the room namespace while keeping the socket open.
    LeaveRoom,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Room code and user of a `join-room` message.
    pub fn join_request(&self) -> Option<(&str, &str)> {
        match self {
            Self::JoinRoom { room_code, user_id } => Some((room_code, user_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Messages pushed to every socket of a room namespace.
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Acknowledgement sent to the socket that just registered.
    #[serde(rename_all = "camelCase")]
    Joined {
        game_type: GameType,
        room: RoomView,
    },
    /// A participant was escrowed into the room.
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        room_code: String,
        user_id: String,
        username: String,
        room: RoomView,
    },
    /// A participant's live connection count went from zero to one or back.
    #[serde(rename_all = "camelCase")]
    PresenceChanged {
        room_code: String,
        user_id: String,
        online: bool,
    },
    /// The host started play.
    #[serde(rename_all = "camelCase")]
    GameStarted { room_code: String, room: RoomView },
    /// A move was accepted.
    #[serde(rename_all = "camelCase")]
    TurnProcessed {
        room_code: String,
        user_id: String,
        #[schema(value_type = Object)]
        game_state: Option<Value>,
    },
    /// The pot was paid out.
    #[serde(rename_all = "camelCase")]
    GameFinished {
        room_code: String,
        winner_id: Option<String>,
        payouts: Vec<Share>,
    },
    /// Every connection dropped and the grace period expired.
    #[serde(rename_all = "camelCase")]
    RoomAbandoned { room_code: String, refunded: bool },
    /// The room was closed by its host, an admin or the inactivity sweep.
    #[serde(rename_all = "camelCase")]
    RoomCancelled {
        room_code: String,
        reason: CancelReason,
        refunded_count: usize,
    },
    /// Rejection of the last client message.
    Error { code: String, message: String },
}

impl ServerMessage {
    /// Error frame built from a stable reason code and a human message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn join_room_uses_kebab_tag_and_camel_fields() {
        let message: ClientMessage = serde_json::from_value(json!({
            "type": "join-room",
            "roomCode": "042917",
            "userId": "u1",
        }))
        .unwrap();
        assert_eq!(message.join_request(), Some(("042917", "u1")));
    }

    #[test]
    fn unknown_messages_are_tolerated() {
        let message: ClientMessage =
            serde_json::from_value(json!({ "type": "dance" })).unwrap();
        assert!(matches!(message, ClientMessage::Unknown));
    }

    #[test]
    fn room_abandoned_serializes_refund_flag() {
        let value = serde_json::to_value(ServerMessage::RoomAbandoned {
            room_code: "042917".into(),
            refunded: true,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "room-abandoned", "roomCode": "042917", "refunded": true })
        );
    }
}
