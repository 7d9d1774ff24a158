use thiserror::Error;

use crate::state::room::{CancelReason, GameType, RoomStatus};

/// Events that can be applied to a room's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A participant was escrowed; carries the participant count after the join.
    Joined {
        /// Number of escrowed participants including the newcomer.
        participants: usize,
    },
    /// The host started play.
    Started,
    /// A terminal move outcome was settled.
    Settled,
    /// The pot was refunded.
    Cancelled(CancelReason),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from}")]
pub struct InvalidTransition {
    /// The status the room was in when the invalid event was received.
    pub from: RoomStatus,
    /// The event that cannot be applied from this status.
    pub event: RoomEvent,
}

/// Forward-only lifecycle shared by every game type.
///
/// ```text
/// waiting ──(min players)──► ready ──(host start)──► playing ──(outcome)──► finished
///    │                         │                        │
///    └─────────────────────────┴────────────────────────┴──────────────────► cancelled
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLifecycle {
    game_type: GameType,
    status: RoomStatus,
}

impl RoomLifecycle {
    /// Resume the lifecycle of a room loaded from storage.
    pub fn new(game_type: GameType, status: RoomStatus) -> Self {
        Self { game_type, status }
    }

    /// Inspect the current status.
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    /// Apply an event, moving the lifecycle to the next status.
    pub fn apply(&mut self, event: RoomEvent) -> Result<RoomStatus, InvalidTransition> {
        let next = self.compute_transition(event)?;
        debug_assert!(
            next.rank() >= self.status.rank(),
            "room status regressed from {} to {}",
            self.status,
            next
        );
        self.status = next;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: RoomEvent) -> Result<RoomStatus, InvalidTransition> {
        let next = match (self.status, &event) {
            (RoomStatus::Waiting, RoomEvent::Joined { participants })
                if *participants >= self.game_type.min_players() =>
            {
                RoomStatus::Ready
            }
            (RoomStatus::Waiting, RoomEvent::Joined { .. }) => RoomStatus::Waiting,
            // Pool games keep accepting players until full or started.
            (RoomStatus::Ready, RoomEvent::Joined { participants })
                if *participants <= self.game_type.max_players() =>
            {
                RoomStatus::Ready
            }
            (RoomStatus::Ready, RoomEvent::Started) => RoomStatus::Playing,
            (RoomStatus::Playing, RoomEvent::Settled) => RoomStatus::Finished,
            (from, RoomEvent::Cancelled(_)) if !from.is_terminal() => RoomStatus::Cancelled,
            (from, _) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
