//! HTTP and socket facing room operations: run the settlement engine, then fan the
//! result out to the room namespace and the lobby.

use serde_json::Value;
use tracing::debug;

use crate::{
    dao::models::RoomEntity,
    dto::{
        room::{
            CancelRoomResponse, CodeLookupResponse, RoomListResponse, RoomView,
            SettlementResponse, StartRoomResponse,
        },
        ws::ServerMessage,
    },
    error::{ServiceError, SettlementError},
    services::{
        code_registry,
        lobby_events,
        payout::SplitPolicy,
        settlement::{MoveResult, Player, RefundResult, RoomConfig},
    },
    state::{
        SharedState,
        room::{CancelReason, GameType, RoomKey},
    },
};

/// Create a room and escrow the host's stake.
pub async fn create_room(
    state: &SharedState,
    host: &Player,
    config: RoomConfig,
) -> Result<RoomView, ServiceError> {
    let engine = state.engine().await?;
    let room = engine.create_and_escrow(host, &config).await?;
    lobby_events::broadcast_room_created(state, &room);
    Ok(RoomView::from(&room))
}

/// Escrow a new participant and announce them to the room.
pub async fn join_room(
    state: &SharedState,
    code: &str,
    player: &Player,
) -> Result<RoomView, ServiceError> {
    let engine = state.engine().await?;
    let room = engine.join_and_escrow(code, player).await?;
    let view = RoomView::from(&room);
    publish(
        state,
        &room,
        ServerMessage::PlayerJoined {
            room_code: room.code.clone(),
            user_id: player.user_id.clone(),
            username: player.username.clone(),
            room: view.clone(),
        },
    );
    lobby_events::broadcast_room_changed(state, &room);
    Ok(view)
}

/// Start a ready room on behalf of its host.
pub async fn start_room(
    state: &SharedState,
    code: &str,
    actor: &str,
) -> Result<StartRoomResponse, ServiceError> {
    let engine = state.engine().await?;
    let room = engine.start(code, actor).await?;
    let view = RoomView::from(&room);
    publish(
        state,
        &room,
        ServerMessage::GameStarted {
            room_code: room.code.clone(),
            room: view.clone(),
        },
    );
    lobby_events::broadcast_room_changed(state, &room);
    Ok(StartRoomResponse { ok: true, room: view })
}

/// Validate and apply a move sent over a room socket.
pub async fn play_move(
    state: &SharedState,
    code: &str,
    user_id: &str,
    payload: &Value,
) -> Result<MoveResult, ServiceError> {
    let engine = state.engine().await?;
    let result = engine.record_move(code, user_id, payload).await?;
    publish(
        state,
        &result.room,
        ServerMessage::TurnProcessed {
            room_code: result.room.code.clone(),
            user_id: user_id.to_owned(),
            game_state: result.room.game_state.clone(),
        },
    );
    if let Some(distribution) = &result.distribution {
        publish(
            state,
            &result.room,
            ServerMessage::GameFinished {
                room_code: result.room.code.clone(),
                winner_id: result.room.winner_id.clone(),
                payouts: distribution.shares.clone(),
            },
        );
        close(state, &result.room);
    }
    Ok(result)
}

/// Pay out a playing room with an outcome computed outside the server.
pub async fn settle_room(
    state: &SharedState,
    code: &str,
    winner: Option<&str>,
    policy: Option<SplitPolicy>,
) -> Result<SettlementResponse, ServiceError> {
    let engine = state.engine().await?;
    let settlement = engine.settle_win(code, winner, policy).await?;
    publish(
        state,
        &settlement.room,
        ServerMessage::GameFinished {
            room_code: settlement.room.code.clone(),
            winner_id: settlement.room.winner_id.clone(),
            payouts: settlement.distribution.shares.clone(),
        },
    );
    close(state, &settlement.room);
    Ok(SettlementResponse::from(&settlement))
}

/// Refund every participant of an open room.
pub async fn cancel_room(
    state: &SharedState,
    code: &str,
    reason: CancelReason,
    actor: Option<&str>,
) -> Result<CancelRoomResponse, ServiceError> {
    let engine = state.engine().await?;
    let refund = engine.cancel_and_refund(code, reason, actor).await?;
    announce_refund(state, &refund, reason);
    Ok(CancelRoomResponse::from(&refund))
}

/// Broadcast a refund and release the room's realtime resources.
pub(crate) fn announce_refund(state: &SharedState, refund: &RefundResult, reason: CancelReason) {
    let room_code = refund.room.code.clone();
    let message = match reason {
        CancelReason::Abandoned => ServerMessage::RoomAbandoned {
            room_code,
            refunded: true,
        },
        _ => ServerMessage::RoomCancelled {
            room_code,
            reason,
            refunded_count: refund.refunded_count,
        },
    };
    publish(state, &refund.room, message);
    close(state, &refund.room);
}

/// Current snapshot of the room identified by `code`.
pub async fn get_room(state: &SharedState, code: &str) -> Result<RoomView, ServiceError> {
    let room = find_room(state, code).await?;
    Ok(RoomView::from(&room))
}

/// Room identified by `code`, active or most recently retired.
pub async fn find_room(state: &SharedState, code: &str) -> Result<RoomEntity, ServiceError> {
    if !code_registry::is_valid_code(code) {
        return Err(SettlementError::InvalidRoomCode(code.to_owned()).into());
    }
    let engine = state.engine().await?;
    engine
        .store()
        .find_room(code)
        .await?
        .ok_or_else(|| SettlementError::RoomNotFound(code.to_owned()).into())
}

/// Public rooms still collecting participants.
pub async fn list_rooms(
    state: &SharedState,
    game_type: Option<GameType>,
) -> Result<RoomListResponse, ServiceError> {
    let engine = state.engine().await?;
    let rooms = engine.store().list_open_rooms(game_type).await?;
    Ok(RoomListResponse {
        rooms: rooms.iter().map(RoomView::from).collect(),
    })
}

/// Resolve a code through the registry.
pub async fn lookup_code(
    state: &SharedState,
    code: &str,
) -> Result<CodeLookupResponse, ServiceError> {
    let engine = state.engine().await?;
    engine
        .registry()
        .find(code)
        .await?
        .map(CodeLookupResponse::from)
        .ok_or_else(|| ServiceError::NotFound(format!("room code `{code}`")))
}

fn publish(state: &SharedState, room: &RoomEntity, message: ServerMessage) {
    let key = RoomKey::new(room.game_type, room.code.clone());
    let receivers = state.channels().publish(&key, message);
    debug!(room = %key, receivers, "room message published");
}

fn close(state: &SharedState, room: &RoomEntity) {
    let key = RoomKey::new(room.game_type, room.code.clone());
    state.presence().forget(&key);
    state.channels().cleanup(&key);
    lobby_events::broadcast_room_changed(state, room);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::MemoryRoomStore,
        state::{AppState, room::Currency},
    };

    async fn installed() -> (SharedState, MemoryRoomStore) {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        (state, store)
    }

    fn config() -> RoomConfig {
        RoomConfig {
            game_type: GameType::Cards,
            currency: Currency::Coins,
            stake: dec!(50),
            max_players: None,
            is_public: true,
        }
    }

    #[tokio::test]
    async fn degraded_state_refuses_room_operations() {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let err = create_room(&state, &Player::new("host", "Host"), config())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn join_is_broadcast_to_the_room_and_the_lobby() {
        let (state, store) = installed().await;
        store.fund_wallet("host", Currency::Coins, dec!(100));
        store.fund_wallet("guest", Currency::Coins, dec!(100));
        let mut lobby = state.lobby_sse().subscribe();

        let room = create_room(&state, &Player::new("host", "Host"), config())
            .await
            .unwrap();
        let key = RoomKey::new(GameType::Cards, room.code.clone());
        let mut socket = state.channels().subscribe(&key);

        let joined = join_room(&state, &room.code, &Player::new("guest", "Guest"))
            .await
            .unwrap();
        assert_eq!(joined.status, "ready");

        match socket.recv().await.unwrap() {
            ServerMessage::PlayerJoined { user_id, room, .. } => {
                assert_eq!(user_id, "guest");
                assert_eq!(room.participants.len(), 2);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(
            lobby.recv().await.unwrap().event.as_deref(),
            Some("room.created")
        );
        assert_eq!(
            lobby.recv().await.unwrap().event.as_deref(),
            Some("room.updated")
        );
    }

    #[tokio::test]
    async fn cancel_clears_presence_and_reports_refund() {
        let (state, store) = installed().await;
        store.fund_wallet("host", Currency::Coins, dec!(100));
        let room = create_room(&state, &Player::new("host", "Host"), config())
            .await
            .unwrap();
        let key = RoomKey::new(GameType::Cards, room.code.clone());
        state.presence().register(&key, "host");
        let mut socket = state.channels().subscribe(&key);

        let response = cancel_room(&state, &room.code, CancelReason::HostClosed, Some("host"))
            .await
            .unwrap();

        assert_eq!(response.refunded_count, 1);
        assert_eq!(response.amount, dec!(50));
        assert_eq!(state.presence().connection_count(&key), 0);
        assert!(matches!(
            socket.recv().await.unwrap(),
            ServerMessage::RoomCancelled {
                reason: CancelReason::HostClosed,
                refunded_count: 1,
                ..
            }
        ));
        assert_eq!(store.balance("host", Currency::Coins), dec!(100));
    }

    #[tokio::test]
    async fn lookups_validate_codes() {
        let (state, _store) = installed().await;
        assert!(matches!(
            get_room(&state, "abc").await.unwrap_err(),
            ServiceError::Settlement(SettlementError::InvalidRoomCode(_))
        ));
        assert!(matches!(
            get_room(&state, "000001").await.unwrap_err(),
            ServiceError::Settlement(SettlementError::RoomNotFound(_))
        ));
        assert!(matches!(
            lookup_code(&state, "000001").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }
}
