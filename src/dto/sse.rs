use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dao::models::RoomEntity,
    state::room::{Currency, GameType},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Public listing entry, sent on `room.created` and `room.updated`.
pub struct LobbyRoomEvent {
    pub code: String,
    pub game_type: GameType,
    /// Client-facing status label.
    pub status: String,
    pub currency: Currency,
    #[schema(value_type = String)]
    pub stake_per_player: Decimal,
    pub players: usize,
    pub max_players: usize,
    pub host_username: String,
}

impl From<&RoomEntity> for LobbyRoomEvent {
    fn from(room: &RoomEntity) -> Self {
        let host_username = room
            .participants
            .iter()
            .find(|participant| participant.user_id == room.host_id)
            .map(|participant| participant.username.clone())
            .unwrap_or_default();
        Self {
            code: room.code.clone(),
            game_type: room.game_type,
            status: room.game_type.status_label(room.status).to_owned(),
            currency: room.currency,
            stake_per_player: room.stake_per_player,
            players: room.participants.len(),
            max_players: room.max_players,
            host_username,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent on `room.closed` once a listed room leaves the lobby.
pub struct LobbyRoomClosedEvent {
    pub code: String,
    pub game_type: GameType,
    pub status: String,
}
