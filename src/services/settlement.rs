//! Settlement engine: the only code allowed to move currency into or out of a pot.
//!
//! Every operation runs inside one [`UnitOfWork`] with the room row locked. The
//! `*_in` variants take the caller's unit of work so several operations can be
//! composed into one transaction; the plain variants open their own unit, commit it
//! on success, roll it back on failure and replay it when the store reports a
//! transient conflict.

use std::{sync::Arc, time::SystemTime};

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{
            CodeStatus, DebitOutcome, LedgerEntry, LedgerKind, ParticipantEntity, RoomEntity,
        },
        room_store::{RoomStore, UnitOfWork},
    },
    error::SettlementError,
    services::{
        code_registry::{self, CodeRegistry},
        game_rules::{self, MoveOutcome},
        payout::{Distribution, PotContext, SplitPolicy},
    },
    state::{
        room::{CancelReason, Currency, GameType, RoomStatus},
        state_machine::{InvalidTransition, RoomEvent, RoomLifecycle},
    },
};

/// Authenticated user acting on a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Identifier issued by the auth layer.
    pub user_id: String,
    /// Display name.
    pub username: String,
}

impl Player {
    /// Build a player from its identifier and display name.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Parameters of a new room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Game family.
    pub game_type: GameType,
    /// Denomination of the stakes.
    pub currency: Currency,
    /// Stake debited from every participant.
    pub stake: Decimal,
    /// Participant bound; defaults to the game's maximum.
    pub max_players: Option<usize>,
    /// Whether the room shows up in the public lobby.
    pub is_public: bool,
}

/// Result of a settled pot.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Room after settlement.
    pub room: RoomEntity,
    /// Credits applied.
    pub distribution: Distribution,
}

/// Result of a refunded pot.
#[derive(Debug, Clone)]
pub struct RefundResult {
    /// Room after cancellation.
    pub room: RoomEntity,
    /// Participants credited back.
    pub refunded_count: usize,
    /// Amount returned to each participant.
    pub amount: Decimal,
    /// Sum of every refund.
    pub total: Decimal,
}

/// Result of an accepted move.
#[derive(Debug, Clone)]
pub struct MoveResult {
    /// Room after the move, settled when the outcome is terminal.
    pub room: RoomEntity,
    /// Outcome reported by the game rules.
    pub outcome: MoveOutcome,
    /// Credits applied when the move ended the game.
    pub distribution: Option<Distribution>,
}

/// Replay `$body` in a fresh unit of work while it fails with a transient storage
/// conflict, committing on success and rolling back on failure.
macro_rules! in_unit_of_work {
    ($engine:expr, $operation:literal, |$unit:ident| $body:expr) => {{
        let engine = $engine;
        let mut attempt: u32 = 0;
        loop {
            let mut owned = engine.store.begin().await?;
            let result = {
                let $unit: &mut dyn UnitOfWork = owned.as_mut();
                $body.await
            };
            match engine.finish(owned, result).await {
                Err(err) if err.is_retryable() && attempt < engine.config.transaction_retries => {
                    attempt += 1;
                    warn!(
                        operation = $operation,
                        attempt,
                        error = %err,
                        "unit of work conflicted; retrying"
                    );
                }
                outcome => break outcome,
            }
        }
    }};
}

/// Transactional procedures moving currency between wallets and pots.
#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn RoomStore>,
    registry: CodeRegistry,
    config: Arc<AppConfig>,
}

impl SettlementEngine {
    /// Engine drawing random room codes.
    pub fn new(store: Arc<dyn RoomStore>, config: Arc<AppConfig>) -> Self {
        let registry = CodeRegistry::new(store.clone(), config.code_reserve_attempts);
        Self::with_registry(store, registry, config)
    }

    /// Engine using a preconfigured code registry.
    pub fn with_registry(
        store: Arc<dyn RoomStore>,
        registry: CodeRegistry,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Room store backing the engine.
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Code registry used for reservations.
    pub fn registry(&self) -> &CodeRegistry {
        &self.registry
    }

    async fn finish<T>(
        &self,
        unit: Box<dyn UnitOfWork>,
        result: Result<T, SettlementError>,
    ) -> Result<T, SettlementError> {
        match result {
            Ok(value) => {
                unit.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "failed to roll back unit of work");
                }
                Err(err)
            }
        }
    }

    fn validate_config(&self, config: &RoomConfig) -> Result<(), SettlementError> {
        if !self.config.stakes.accepts(config.currency, config.stake) {
            return Err(SettlementError::InvalidStake {
                currency: config.currency,
                amount: config.stake,
            });
        }
        Ok(())
    }

    /// Create a room, escrow the host stake and reserve its code.
    pub async fn create_and_escrow(
        &self,
        host: &Player,
        config: &RoomConfig,
    ) -> Result<RoomEntity, SettlementError> {
        self.validate_config(config)?;
        let room = in_unit_of_work!(self, "create_and_escrow", |unit| self
            .create_and_escrow_in(unit, host, config))?;
        info!(
            code = %room.code,
            game_type = %room.game_type,
            host_id = %host.user_id,
            stake = %room.stake_per_player,
            currency = %room.currency,
            "room created"
        );
        Ok(room)
    }

    /// [`Self::create_and_escrow`] inside the caller's unit of work.
    pub async fn create_and_escrow_in(
        &self,
        unit: &mut dyn UnitOfWork,
        host: &Player,
        config: &RoomConfig,
    ) -> Result<RoomEntity, SettlementError> {
        self.validate_config(config)?;

        let game_max = config.game_type.max_players();
        let max_players = config
            .max_players
            .unwrap_or(game_max)
            .clamp(config.game_type.min_players(), game_max);

        let id = Uuid::new_v4();
        let code = self.registry.reserve_in(unit, config.game_type, id).await?;

        let escrow = LedgerEntry {
            user_id: host.user_id.clone(),
            currency: config.currency,
            amount: config.stake,
            kind: LedgerKind::Escrow,
            reference: code.clone(),
        };
        if unit.debit(escrow).await? == DebitOutcome::Insufficient {
            return Err(SettlementError::InsufficientBalance);
        }

        let now = SystemTime::now();
        let mut lifecycle = RoomLifecycle::new(config.game_type, RoomStatus::Waiting);
        let status = lifecycle.apply(RoomEvent::Joined { participants: 1 })?;
        let room = RoomEntity {
            id,
            code,
            game_type: config.game_type,
            status,
            currency: config.currency,
            stake_per_player: config.stake,
            pot: config.stake,
            max_players,
            host_id: host.user_id.clone(),
            participants: vec![ParticipantEntity {
                user_id: host.user_id.clone(),
                username: host.username.clone(),
                joined_at: now,
            }],
            is_public: config.is_public,
            game_state: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            winner_id: None,
            cancel_reason: None,
            last_activity_at: now,
        };
        unit.insert_room(room.clone()).await?;
        Ok(room)
    }

    /// Escrow the stake of a new participant.
    pub async fn join_and_escrow(
        &self,
        code: &str,
        player: &Player,
    ) -> Result<RoomEntity, SettlementError> {
        ensure_code(code)?;
        let room = in_unit_of_work!(self, "join_and_escrow", |unit| self
            .join_and_escrow_in(unit, code, player))?;
        info!(
            %code,
            user_id = %player.user_id,
            participants = room.participants.len(),
            status = %room.status,
            "participant escrowed"
        );
        Ok(room)
    }

    /// [`Self::join_and_escrow`] inside the caller's unit of work.
    pub async fn join_and_escrow_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        player: &Player,
    ) -> Result<RoomEntity, SettlementError> {
        ensure_code(code)?;
        let mut room = lock(unit, code).await?;

        if room.status.is_terminal() || room.status == RoomStatus::Playing {
            return Err(SettlementError::RoomNotJoinable {
                code: code.to_owned(),
                status: room.status,
            });
        }
        if room.has_participant(&player.user_id) {
            return Err(SettlementError::AlreadyJoined {
                code: code.to_owned(),
                user_id: player.user_id.clone(),
            });
        }
        if room.is_full() {
            return Err(SettlementError::RoomFull(code.to_owned()));
        }

        let escrow = LedgerEntry {
            user_id: player.user_id.clone(),
            currency: room.currency,
            amount: room.stake_per_player,
            kind: LedgerKind::Escrow,
            reference: room.code.clone(),
        };
        if unit.debit(escrow).await? == DebitOutcome::Insufficient {
            return Err(SettlementError::InsufficientBalance);
        }

        let now = SystemTime::now();
        room.participants.push(ParticipantEntity {
            user_id: player.user_id.clone(),
            username: player.username.clone(),
            joined_at: now,
        });
        room.pot += room.stake_per_player;
        room.status = RoomLifecycle::new(room.game_type, room.status).apply(RoomEvent::Joined {
            participants: room.participants.len(),
        })?;
        room.last_activity_at = now;
        debug_assert_eq!(room.pot, room.expected_pot());

        unit.update_room(room.clone()).await?;
        Ok(room)
    }

    /// Move a ready room to `playing`. Only the host may start and no currency moves.
    pub async fn start(&self, code: &str, actor: &str) -> Result<RoomEntity, SettlementError> {
        ensure_code(code)?;
        let room = in_unit_of_work!(self, "start", |unit| self.start_in(unit, code, actor))?;
        info!(%code, host_id = %actor, "room started");
        Ok(room)
    }

    /// [`Self::start`] inside the caller's unit of work.
    pub async fn start_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        actor: &str,
    ) -> Result<RoomEntity, SettlementError> {
        let mut room = lock(unit, code).await?;
        if room.host_id != actor {
            return Err(SettlementError::NotHost(code.to_owned()));
        }
        ensure_not_terminal(&room)?;

        room.status = RoomLifecycle::new(room.game_type, room.status).apply(RoomEvent::Started)?;
        let now = SystemTime::now();
        room.started_at = Some(now);
        room.last_activity_at = now;
        room.game_state = game_rules::rules_for(room.game_type)
            .map(|rules| rules.initial_state(&room.participant_ids()));

        unit.update_room(room.clone()).await?;
        Ok(room)
    }

    /// Validate and persist a move; a terminal outcome settles the room in the same
    /// unit of work with the game's default split.
    pub async fn record_move(
        &self,
        code: &str,
        user_id: &str,
        payload: &Value,
    ) -> Result<MoveResult, SettlementError> {
        ensure_code(code)?;
        let result = in_unit_of_work!(self, "record_move", |unit| self
            .record_move_in(unit, code, user_id, payload))?;
        if let Some(distribution) = &result.distribution {
            info!(
                %code,
                winner_id = ?result.outcome.winner(),
                shares = distribution.shares.len(),
                "room settled by terminal move"
            );
        }
        Ok(result)
    }

    /// [`Self::record_move`] inside the caller's unit of work.
    pub async fn record_move_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        user_id: &str,
        payload: &Value,
    ) -> Result<MoveResult, SettlementError> {
        let mut room = lock(unit, code).await?;
        ensure_not_terminal(&room)?;
        if room.status != RoomStatus::Playing {
            return Err(SettlementError::InvalidMove(format!(
                "room `{code}` is {}, not playing",
                room.status
            )));
        }
        if !room.has_participant(user_id) {
            return Err(SettlementError::NotParticipant {
                code: code.to_owned(),
                user_id: user_id.to_owned(),
            });
        }
        let rules = game_rules::rules_for(room.game_type)
            .ok_or_else(|| SettlementError::UnsupportedGame(room.game_type.to_string()))?;

        let state = room
            .game_state
            .take()
            .unwrap_or_else(|| rules.initial_state(&room.participant_ids()));
        let (next, outcome) = rules
            .apply_move(&state, user_id, payload)
            .map_err(SettlementError::InvalidMove)?;
        room.game_state = Some(next);
        room.last_activity_at = SystemTime::now();

        if !outcome.is_terminal() {
            unit.update_room(room.clone()).await?;
            return Ok(MoveResult {
                room,
                outcome,
                distribution: None,
            });
        }

        let winner = outcome.winner().map(str::to_owned);
        let policy = SplitPolicy::default_for(room.game_type, winner.as_deref());
        let settlement = self
            .settle_locked(unit, room, winner.as_deref(), policy)
            .await?;
        Ok(MoveResult {
            room: settlement.room,
            outcome,
            distribution: Some(settlement.distribution),
        })
    }

    /// Pay out a playing room. A second call fails with
    /// [`SettlementError::AlreadyTerminal`] without touching any wallet.
    pub async fn settle_win(
        &self,
        code: &str,
        winner: Option<&str>,
        policy: Option<SplitPolicy>,
    ) -> Result<Settlement, SettlementError> {
        ensure_code(code)?;
        let settlement = in_unit_of_work!(self, "settle_win", |unit| self
            .settle_win_in(unit, code, winner, policy))?;
        info!(
            %code,
            winner_id = ?winner,
            total = %settlement.distribution.total(),
            "room settled"
        );
        Ok(settlement)
    }

    /// [`Self::settle_win`] inside the caller's unit of work.
    pub async fn settle_win_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        winner: Option<&str>,
        policy: Option<SplitPolicy>,
    ) -> Result<Settlement, SettlementError> {
        let room = lock(unit, code).await?;
        ensure_not_terminal(&room)?;
        let policy = policy.unwrap_or_else(|| SplitPolicy::default_for(room.game_type, winner));
        self.settle_locked(unit, room, winner, policy).await
    }

    async fn settle_locked(
        &self,
        unit: &mut dyn UnitOfWork,
        mut room: RoomEntity,
        winner: Option<&str>,
        policy: SplitPolicy,
    ) -> Result<Settlement, SettlementError> {
        if policy == SplitPolicy::Draw && winner.is_some() {
            return Err(SettlementError::InvalidMove(
                "a draw cannot name a winner".into(),
            ));
        }
        room.status = RoomLifecycle::new(room.game_type, room.status).apply(RoomEvent::Settled)?;
        debug_assert_eq!(room.pot, room.expected_pot());

        let participants = room.participant_ids();
        let distribution = policy.distribute(
            PotContext {
                pot: room.pot,
                host_id: &room.host_id,
                participants: &participants,
                platform_wallet: &self.config.platform_wallet,
            },
            &room.code,
            winner,
        )?;

        for share in &distribution.shares {
            unit.credit(LedgerEntry {
                user_id: share.user_id.clone(),
                currency: room.currency,
                amount: share.amount,
                kind: share.role.ledger_kind(),
                reference: room.code.clone(),
            })
            .await?;
        }

        room.winner_id = winner.map(str::to_owned);
        room.pot = Decimal::ZERO;
        room.finished_at = Some(SystemTime::now());
        unit.update_room(room.clone()).await?;
        self.registry
            .retire_in(unit, &room.code, CodeStatus::Finished)
            .await?;

        Ok(Settlement { room, distribution })
    }

    /// Refund every participant and cancel the room. A second call fails with
    /// [`SettlementError::AlreadyTerminal`] without touching any wallet.
    ///
    /// `actor` is checked only for [`CancelReason::HostClosed`], which is limited to
    /// the host of a room that has not started.
    pub async fn cancel_and_refund(
        &self,
        code: &str,
        reason: CancelReason,
        actor: Option<&str>,
    ) -> Result<RefundResult, SettlementError> {
        ensure_code(code)?;
        let refund = in_unit_of_work!(self, "cancel_and_refund", |unit| self
            .cancel_and_refund_in(unit, code, reason, actor))?;
        info!(
            %code,
            %reason,
            refunded = refund.refunded_count,
            total = %refund.total,
            "room cancelled and refunded"
        );
        Ok(refund)
    }

    /// [`Self::cancel_and_refund`] inside the caller's unit of work.
    pub async fn cancel_and_refund_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        reason: CancelReason,
        actor: Option<&str>,
    ) -> Result<RefundResult, SettlementError> {
        let room = lock(unit, code).await?;
        ensure_not_terminal(&room)?;

        if reason == CancelReason::HostClosed {
            if actor != Some(room.host_id.as_str()) {
                return Err(SettlementError::NotHost(code.to_owned()));
            }
            if room.status == RoomStatus::Playing {
                return Err(InvalidTransition {
                    from: room.status,
                    event: RoomEvent::Cancelled(reason),
                }
                .into());
            }
        }

        self.refund_locked(unit, room, reason).await
    }

    /// Cancel a room for inactivity only if it is still idle once locked. Returns
    /// `None` when activity since `idle_since` kept it alive.
    pub async fn cancel_idle(
        &self,
        code: &str,
        idle_since: SystemTime,
    ) -> Result<Option<RefundResult>, SettlementError> {
        ensure_code(code)?;
        let refund = in_unit_of_work!(self, "cancel_idle", |unit| self
            .cancel_idle_in(unit, code, idle_since))?;
        if let Some(refund) = &refund {
            info!(
                %code,
                refunded = refund.refunded_count,
                total = %refund.total,
                "idle room cancelled and refunded"
            );
        }
        Ok(refund)
    }

    /// [`Self::cancel_idle`] inside the caller's unit of work.
    pub async fn cancel_idle_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        idle_since: SystemTime,
    ) -> Result<Option<RefundResult>, SettlementError> {
        let room = lock(unit, code).await?;
        ensure_not_terminal(&room)?;
        if room.last_activity_at >= idle_since {
            return Ok(None);
        }
        self.refund_locked(unit, room, CancelReason::Inactive)
            .await
            .map(Some)
    }

    async fn refund_locked(
        &self,
        unit: &mut dyn UnitOfWork,
        mut room: RoomEntity,
        reason: CancelReason,
    ) -> Result<RefundResult, SettlementError> {
        room.status =
            RoomLifecycle::new(room.game_type, room.status).apply(RoomEvent::Cancelled(reason))?;
        debug_assert_eq!(room.pot, room.expected_pot());

        let amount = room.stake_per_player;
        for participant in &room.participants {
            unit.credit(LedgerEntry {
                user_id: participant.user_id.clone(),
                currency: room.currency,
                amount,
                kind: LedgerKind::Refund,
                reference: room.code.clone(),
            })
            .await?;
        }

        let refunded_count = room.participants.len();
        let total = amount * Decimal::from(refunded_count);
        room.pot = Decimal::ZERO;
        room.cancel_reason = Some(reason);
        room.finished_at = Some(SystemTime::now());
        unit.update_room(room.clone()).await?;
        self.registry
            .retire_in(unit, &room.code, CodeStatus::Cancelled)
            .await?;

        Ok(RefundResult {
            room,
            refunded_count,
            amount,
            total,
        })
    }
}

fn ensure_code(code: &str) -> Result<(), SettlementError> {
    if code_registry::is_valid_code(code) {
        Ok(())
    } else {
        Err(SettlementError::InvalidRoomCode(code.to_owned()))
    }
}

fn ensure_not_terminal(room: &RoomEntity) -> Result<(), SettlementError> {
    if room.status.is_terminal() {
        return Err(SettlementError::AlreadyTerminal {
            code: room.code.clone(),
            status: room.status,
        });
    }
    Ok(())
}

async fn lock(unit: &mut dyn UnitOfWork, code: &str) -> Result<RoomEntity, SettlementError> {
    unit.lock_room(code)
        .await?
        .ok_or_else(|| SettlementError::RoomNotFound(code.to_owned()))
}
