use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Game families sharing the room code namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// Turn-based noughts and crosses.
    TicTacToe,
    /// Turn-based card-capture game.
    Cards,
    /// Physics-driven billiards, outcome reported by the game engine.
    Billiards,
    /// Pool-style numbers draw.
    Bingo,
}

impl GameType {
    /// Every game type, in a stable order.
    pub const ALL: [GameType; 4] = [
        GameType::TicTacToe,
        GameType::Cards,
        GameType::Billiards,
        GameType::Bingo,
    ];

    /// Stable identifier used in storage, namespaces and URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            GameType::TicTacToe => "tic_tac_toe",
            GameType::Cards => "cards",
            GameType::Billiards => "billiards",
            GameType::Bingo => "bingo",
        }
    }

    /// Participants required before a room becomes `ready`.
    pub fn min_players(self) -> usize {
        2
    }

    /// Hard upper bound on participants for this game.
    pub fn max_players(self) -> usize {
        match self {
            GameType::Bingo => 10,
            _ => 2,
        }
    }

    /// Whether payouts follow the pool policy (winner, host and platform shares).
    pub fn is_pool(self) -> bool {
        matches!(self, GameType::Bingo)
    }

    /// Label exposed to clients for a given status. Bingo historically calls
    /// the playing phase `in_progress`.
    pub fn status_label(self, status: RoomStatus) -> &'static str {
        match (self, status) {
            (GameType::Bingo, RoomStatus::Playing) => "in_progress",
            (_, status) => status.as_str(),
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two internal play-money denominations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Soft currency, staked in a bounded whole-number range.
    Coins,
    /// Premium currency, staked in fixed units.
    Fires,
}

impl Currency {
    /// Stable identifier used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Coins => "coins",
            Currency::Fires => "fires",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared lifecycle status of every room, regardless of game type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Collecting participants.
    Waiting,
    /// Enough participants escrowed; waiting for the host to start.
    Ready,
    /// Moves are accepted.
    Playing,
    /// Settled with a winner or a draw.
    Finished,
    /// Refunded without a completed game.
    Cancelled,
}

impl RoomStatus {
    /// Stable identifier used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Ready => "ready",
            RoomStatus::Playing => "playing",
            RoomStatus::Finished => "finished",
            RoomStatus::Cancelled => "cancelled",
        }
    }

    /// `finished` and `cancelled` accept no further transitions nor currency movements.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Finished | RoomStatus::Cancelled)
    }

    /// Statuses that still hold an undistributed pot.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Position along the forward-only lifecycle. Terminal states share a rank.
    pub fn rank(self) -> u8 {
        match self {
            RoomStatus::Waiting => 0,
            RoomStatus::Ready => 1,
            RoomStatus::Playing => 2,
            RoomStatus::Finished | RoomStatus::Cancelled => 3,
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a room was cancelled and refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The host closed an unstarted room.
    HostClosed,
    /// An administrator force-closed the room.
    AdminClosed,
    /// Every connection dropped and the grace period expired.
    Abandoned,
    /// The durable sweep found the room idle past the inactivity threshold.
    Inactive,
}

impl CancelReason {
    /// Stable identifier used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::HostClosed => "host_closed",
            CancelReason::AdminClosed => "admin_closed",
            CancelReason::Abandoned => "abandoned",
            CancelReason::Inactive => "inactive",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a room's realtime namespace: `game_type:room_code`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    /// Game family of the room.
    pub game_type: GameType,
    /// Six digit room code.
    pub code: String,
}

impl RoomKey {
    /// Build a key from its parts.
    pub fn new(game_type: GameType, code: impl Into<String>) -> Self {
        Self {
            game_type,
            code: code.into(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.game_type, self.code)
    }
}
