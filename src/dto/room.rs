use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{CodeReservationEntity, ParticipantEntity, RoomEntity},
    dto::{
        format_system_time,
        validation::{validate_positive_amount, validate_room_code, validate_user_id},
    },
    services::{
        payout::{Share, SplitPolicy},
        settlement::{RefundResult, RoomConfig, Settlement},
    },
    state::room::{CancelReason, Currency, GameType},
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload used to create a room and escrow the host stake.
pub struct CreateRoomRequest {
    pub game_type: GameType,
    pub currency: Currency,
    /// Stake per participant, as a decimal string (`"100"`).
    #[schema(value_type = String, example = "100")]
    #[validate(custom(function = "validate_positive_amount"))]
    pub stake: Decimal,
    /// Participant bound; defaults to the game's maximum.
    #[validate(range(min = 2, max = 10))]
    pub max_players: Option<usize>,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

impl From<CreateRoomRequest> for RoomConfig {
    fn from(request: CreateRoomRequest) -> Self {
        Self {
            game_type: request.game_type,
            currency: request.currency,
            stake: request.stake,
            max_players: request.max_players,
            is_public: request.is_public,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
/// Filter of the public room listing.
pub struct ListRoomsQuery {
    /// Restrict the listing to one game type.
    pub game_type: Option<GameType>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Admin payload reporting the outcome of a game computed outside the server.
pub struct SettleRoomRequest {
    /// Winner; omit for a draw.
    #[validate(custom(function = "validate_user_id"))]
    pub winner_id: Option<String>,
    /// Split override; defaults to the game's policy.
    pub policy: Option<SplitPolicy>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Path parameters carrying a room code.
pub struct RoomCodePath {
    #[validate(custom(function = "validate_room_code"))]
    pub code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Escrowed member as shown to clients.
pub struct ParticipantView {
    pub user_id: String,
    pub username: String,
    pub joined_at: String,
}

impl From<&ParticipantEntity> for ParticipantView {
    fn from(participant: &ParticipantEntity) -> Self {
        Self {
            user_id: participant.user_id.clone(),
            username: participant.username.clone(),
            joined_at: format_system_time(participant.joined_at),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Room snapshot returned by every room endpoint.
pub struct RoomView {
    pub id: Uuid,
    pub code: String,
    pub game_type: GameType,
    /// Lifecycle status; bingo reports `playing` as `in_progress`.
    pub status: String,
    pub currency: Currency,
    #[schema(value_type = String)]
    pub stake_per_player: Decimal,
    /// Escrowed, undistributed total; zero once the room is terminal.
    #[schema(value_type = String)]
    pub pot: Decimal,
    pub max_players: usize,
    pub host_id: String,
    pub participants: Vec<ParticipantView>,
    pub is_public: bool,
    #[schema(value_type = Option<Object>)]
    pub game_state: Option<serde_json::Value>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub winner_id: Option<String>,
    pub cancel_reason: Option<CancelReason>,
    pub last_activity_at: String,
}

impl From<&RoomEntity> for RoomView {
    fn from(room: &RoomEntity) -> Self {
        Self {
            id: room.id,
            code: room.code.clone(),
            game_type: room.game_type,
            status: room.game_type.status_label(room.status).to_owned(),
            currency: room.currency,
            stake_per_player: room.stake_per_player,
            pot: room.pot,
            max_players: room.max_players,
            host_id: room.host_id.clone(),
            participants: room.participants.iter().map(Into::into).collect(),
            is_public: room.is_public,
            game_state: room.game_state.clone(),
            created_at: format_system_time(room.created_at),
            started_at: room.started_at.map(format_system_time),
            finished_at: room.finished_at.map(format_system_time),
            winner_id: room.winner_id.clone(),
            cancel_reason: room.cancel_reason,
            last_activity_at: format_system_time(room.last_activity_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Listing of the public rooms still collecting participants.
pub struct RoomListResponse {
    pub rooms: Vec<RoomView>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Acknowledgement of a started room.
pub struct StartRoomResponse {
    pub ok: bool,
    pub room: RoomView,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Refund summary of a cancelled room.
pub struct CancelRoomResponse {
    pub refunded_count: usize,
    /// Amount returned to each participant.
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub room: RoomView,
}

impl From<&RefundResult> for CancelRoomResponse {
    fn from(refund: &RefundResult) -> Self {
        Self {
            refunded_count: refund.refunded_count,
            amount: refund.amount,
            total: refund.total,
            room: (&refund.room).into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Credits applied by a settlement.
pub struct SettlementResponse {
    pub room: RoomView,
    pub payouts: Vec<Share>,
}

impl From<&Settlement> for SettlementResponse {
    fn from(settlement: &Settlement) -> Self {
        Self {
            room: (&settlement.room).into(),
            payouts: settlement.distribution.shares.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Registry row resolved from a room code.
pub struct CodeLookupResponse {
    pub code: String,
    pub game_type: GameType,
    pub room_id: Uuid,
    /// `active`, `finished` or `cancelled`.
    pub status: String,
    pub reserved_at: String,
}

impl From<CodeReservationEntity> for CodeLookupResponse {
    fn from(row: CodeReservationEntity) -> Self {
        Self {
            code: row.code,
            game_type: row.game_type,
            room_id: row.room_id,
            status: row.status.as_str().to_owned(),
            reserved_at: format_system_time(row.reserved_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use validator::Validate;

    use super::*;

    #[test]
    fn create_request_reads_stake_as_string() {
        let request: CreateRoomRequest = serde_json::from_value(json!({
            "gameType": "tic_tac_toe",
            "currency": "coins",
            "stake": "100",
        }))
        .unwrap();

        assert_eq!(request.stake, dec!(100));
        assert!(request.is_public);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn create_request_rejects_bad_bounds() {
        let request: CreateRoomRequest = serde_json::from_value(json!({
            "gameType": "bingo",
            "currency": "fires",
            "stake": "-1",
            "maxPlayers": 40,
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("stake"));
        assert!(fields.contains_key("max_players"));
    }

    #[test]
    fn room_code_path_is_validated() {
        assert!(RoomCodePath { code: "012345".into() }.validate().is_ok());
        assert!(RoomCodePath { code: "12345".into() }.validate().is_err());
    }
}
