use mongodb::bson::{DateTime, Document, doc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{
        CodeReservationEntity, CodeStatus, LedgerKind, ParticipantEntity, RoomEntity,
        WalletEntity, WalletTransactionEntity,
    },
    state::room::{CancelReason, Currency, GameType, RoomStatus},
};

pub const ROOMS: &str = "rooms";
pub const ROOM_CODES: &str = "room_codes";
pub const WALLETS: &str = "wallets";
pub const WALLET_TRANSACTIONS: &str = "wallet_transactions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipant {
    user_id: String,
    username: String,
    joined_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    id: String,
    code: String,
    game_type: GameType,
    status: RoomStatus,
    currency: Currency,
    stake_per_player: Decimal,
    pot: Decimal,
    max_players: i32,
    host_id: String,
    participants: Vec<MongoParticipant>,
    is_public: bool,
    game_state: Option<serde_json::Value>,
    created_at: DateTime,
    started_at: Option<DateTime>,
    finished_at: Option<DateTime>,
    winner_id: Option<String>,
    cancel_reason: Option<CancelReason>,
    last_activity_at: DateTime,
    /// Bumped by every lock so concurrent transactions touching the room conflict.
    #[serde(default)]
    lock_seq: i64,
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            id: value.id.to_string(),
            code: value.code,
            game_type: value.game_type,
            status: value.status,
            currency: value.currency,
            stake_per_player: value.stake_per_player,
            pot: value.pot,
            max_players: i32::try_from(value.max_players).unwrap_or(i32::MAX),
            host_id: value.host_id,
            participants: value
                .participants
                .into_iter()
                .map(|participant| MongoParticipant {
                    user_id: participant.user_id,
                    username: participant.username,
                    joined_at: DateTime::from_system_time(participant.joined_at),
                })
                .collect(),
            is_public: value.is_public,
            game_state: value.game_state,
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            finished_at: value.finished_at.map(DateTime::from_system_time),
            winner_id: value.winner_id,
            cancel_reason: value.cancel_reason,
            last_activity_at: DateTime::from_system_time(value.last_activity_at),
            lock_seq: 0,
        }
    }
}

impl MongoRoomDocument {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl TryFrom<MongoRoomDocument> for RoomEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRoomDocument) -> MongoResult<Self> {
        let id = parse_id(ROOMS, &value.id)?;
        let max_players =
            usize::try_from(value.max_players).map_err(|_| MongoDaoError::CorruptDocument {
                collection: ROOMS,
                id: value.id.clone(),
                message: format!("negative max_players {}", value.max_players),
            })?;

        Ok(Self {
            id,
            code: value.code,
            game_type: value.game_type,
            status: value.status,
            currency: value.currency,
            stake_per_player: value.stake_per_player,
            pot: value.pot,
            max_players,
            host_id: value.host_id,
            participants: value
                .participants
                .into_iter()
                .map(|participant| ParticipantEntity {
                    user_id: participant.user_id,
                    username: participant.username,
                    joined_at: participant.joined_at.to_system_time(),
                })
                .collect(),
            is_public: value.is_public,
            game_state: value.game_state,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            finished_at: value.finished_at.map(DateTime::to_system_time),
            winner_id: value.winner_id,
            cancel_reason: value.cancel_reason,
            last_activity_at: value.last_activity_at.to_system_time(),
        })
    }
}

/// Registry row. Several rows may share a code; at most one of them is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCodeDocument {
    code: String,
    game_type: GameType,
    room_id: String,
    status: CodeStatus,
    reserved_at: DateTime,
}

impl From<CodeReservationEntity> for MongoCodeDocument {
    fn from(value: CodeReservationEntity) -> Self {
        Self {
            code: value.code,
            game_type: value.game_type,
            room_id: value.room_id.to_string(),
            status: value.status,
            reserved_at: DateTime::from_system_time(value.reserved_at),
        }
    }
}

impl TryFrom<MongoCodeDocument> for CodeReservationEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoCodeDocument) -> MongoResult<Self> {
        Ok(Self {
            room_id: parse_id(ROOM_CODES, &value.room_id)?,
            code: value.code,
            game_type: value.game_type,
            status: value.status,
            reserved_at: value.reserved_at.to_system_time(),
        })
    }
}

impl MongoCodeDocument {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoWalletDocument {
    #[serde(rename = "_id")]
    user_id: String,
    #[serde(default)]
    coins: Decimal,
    #[serde(default)]
    fires: Decimal,
}

impl From<WalletEntity> for MongoWalletDocument {
    fn from(value: WalletEntity) -> Self {
        Self {
            user_id: value.user_id,
            coins: value.coins,
            fires: value.fires,
        }
    }
}

impl From<MongoWalletDocument> for WalletEntity {
    fn from(value: MongoWalletDocument) -> Self {
        Self {
            user_id: value.user_id,
            coins: value.coins,
            fires: value.fires,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoWalletTransactionDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    kind: LedgerKind,
    currency: Currency,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    reference: String,
    created_at: DateTime,
}

impl From<WalletTransactionEntity> for MongoWalletTransactionDocument {
    fn from(value: WalletTransactionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            user_id: value.user_id,
            kind: value.kind,
            currency: value.currency,
            amount: value.amount,
            balance_before: value.balance_before,
            balance_after: value.balance_after,
            reference: value.reference,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoWalletTransactionDocument> for WalletTransactionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoWalletTransactionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(WALLET_TRANSACTIONS, &value.id)?,
            user_id: value.user_id,
            kind: value.kind,
            currency: value.currency,
            amount: value.amount,
            balance_before: value.balance_before,
            balance_after: value.balance_after,
            reference: value.reference,
            created_at: value.created_at.to_system_time(),
        })
    }
}

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::CorruptDocument {
        collection,
        id: raw.to_owned(),
        message: err.to_string(),
    })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

pub fn active_code_filter(code: &str) -> Document {
    doc! { "code": code, "status": CodeStatus::Active.as_str() }
}

pub fn open_statuses() -> Vec<&'static str> {
    [RoomStatus::Waiting, RoomStatus::Ready, RoomStatus::Playing]
        .into_iter()
        .map(RoomStatus::as_str)
        .collect()
}
