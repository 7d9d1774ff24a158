use std::time::SystemTime;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::room::{CancelReason, Currency, GameType, RoomStatus};

/// Escrowed member of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Identifier issued by the upstream auth layer.
    pub user_id: String,
    /// Display name captured at join time.
    pub username: String,
    /// When the stake was escrowed.
    pub joined_at: SystemTime,
}

/// Durable room record. Every game type shares this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Primary key owned by the room store.
    pub id: Uuid,
    /// Six digit code, unique while its reservation is active.
    pub code: String,
    /// Game family of the room.
    pub game_type: GameType,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Denomination of every stake in this room.
    pub currency: Currency,
    /// Stake debited from each participant on join.
    pub stake_per_player: Decimal,
    /// Escrowed, undistributed total.
    pub pot: Decimal,
    /// Participant bound for this room (at most the game's maximum).
    pub max_players: usize,
    /// Creator of the room, always the first participant.
    pub host_id: String,
    /// Escrowed participants in join order.
    pub participants: Vec<ParticipantEntity>,
    /// Whether the room shows up in the public lobby.
    pub is_public: bool,
    /// Opaque game-specific state maintained by the game rules.
    pub game_state: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// When the host started play.
    pub started_at: Option<SystemTime>,
    /// When the room reached a terminal status.
    pub finished_at: Option<SystemTime>,
    /// Winner of a settled room; `None` for draws and cancellations.
    pub winner_id: Option<String>,
    /// Why the room was cancelled, if it was.
    pub cancel_reason: Option<CancelReason>,
    /// Last join, start or accepted move. Drives the inactivity sweep.
    pub last_activity_at: SystemTime,
}

impl RoomEntity {
    /// Whether `user_id` holds an escrowed seat.
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// Whether the participant bound has been reached.
    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_players
    }

    /// Participant identifiers in join order.
    pub fn participant_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.user_id.clone())
            .collect()
    }

    /// Pot expected from the escrowed participants while the room is open.
    pub fn expected_pot(&self) -> Decimal {
        self.stake_per_player * Decimal::from(self.participants.len())
    }
}

/// Status of a room code reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    /// The code currently identifies an open room.
    Active,
    /// The room settled; the code can be reused.
    Finished,
    /// The room was refunded; the code can be reused.
    Cancelled,
}

impl CodeStatus {
    /// Stable identifier used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            CodeStatus::Active => "active",
            CodeStatus::Finished => "finished",
            CodeStatus::Cancelled => "cancelled",
        }
    }
}

/// Row of the cross-game room code registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeReservationEntity {
    /// Six digit code.
    pub code: String,
    /// Game family owning the code.
    pub game_type: GameType,
    /// Room holding the code.
    pub room_id: Uuid,
    /// Reservation status.
    pub status: CodeStatus,
    /// When the code was reserved.
    pub reserved_at: SystemTime,
}

/// Balances of a user in both denominations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletEntity {
    /// Owner of the wallet.
    pub user_id: String,
    /// Coins balance.
    pub coins: Decimal,
    /// Fires balance.
    pub fires: Decimal,
}

impl WalletEntity {
    /// Empty wallet for a user that never held funds.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            coins: Decimal::ZERO,
            fires: Decimal::ZERO,
        }
    }

    /// Balance for one denomination.
    pub fn balance(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Coins => self.coins,
            Currency::Fires => self.fires,
        }
    }

    /// Mutable balance for one denomination.
    pub fn balance_mut(&mut self, currency: Currency) -> &mut Decimal {
        match currency {
            Currency::Coins => &mut self.coins,
            Currency::Fires => &mut self.fires,
        }
    }
}

/// Purpose of a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Stake moved from a wallet into a pot.
    Escrow,
    /// Winner share of a pot.
    Payout,
    /// Stake returned from a cancelled pot.
    Refund,
    /// Host share of a pool pot.
    HostFee,
    /// Platform share of a pot, including rounding remainders.
    PlatformFee,
}

/// A debit or credit requested by the settlement engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Wallet owner.
    pub user_id: String,
    /// Denomination.
    pub currency: Currency,
    /// Non-negative amount.
    pub amount: Decimal,
    /// Purpose of the movement.
    pub kind: LedgerKind,
    /// Room code the movement belongs to.
    pub reference: String,
}

/// Append-only audit row written for every applied ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletTransactionEntity {
    /// Row identifier.
    pub id: Uuid,
    /// Wallet owner.
    pub user_id: String,
    /// Purpose of the movement.
    pub kind: LedgerKind,
    /// Denomination.
    pub currency: Currency,
    /// Signed amount: negative for debits.
    pub amount: Decimal,
    /// Balance before the movement.
    pub balance_before: Decimal,
    /// Balance after the movement.
    pub balance_after: Decimal,
    /// Room code the movement belongs to.
    pub reference: String,
    /// When the movement was committed.
    pub created_at: SystemTime,
}

/// Result of an atomic debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Funds moved.
    Applied,
    /// Balance would have gone negative; nothing moved.
    Insufficient,
}
