//! Turns expired presence grace periods into refunds.

use tracing::{debug, info, warn};

use crate::{
    dto::ws::ServerMessage,
    error::{ServiceError, SettlementError},
    services::room_service,
    state::{
        AbandonedRooms, SharedState,
        room::{CancelReason, RoomKey},
    },
};

/// What happened to a room reported as abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonmentOutcome {
    /// Every participant was refunded.
    Refunded,
    /// Another path already settled or cancelled the room.
    AlreadyTerminal,
    /// The code now belongs to a room of another game.
    Stale,
    /// Someone reconnected after the grace period expired; the room stays open.
    Reconnected,
}

/// Consume the presence tracker's abandonment channel until it closes.
pub async fn run(state: SharedState, mut abandoned: AbandonedRooms) {
    while let Some(key) = abandoned.recv().await {
        match resolve(&state, &key).await {
            Ok(outcome) => debug!(room = %key, ?outcome, "abandonment handled"),
            // The durable sweep picks the room up once storage is back.
            Err(err) => warn!(room = %key, error = %err, "abandonment refund failed"),
        }
    }
    info!("abandonment channel closed");
}

/// Refund an abandoned room through the guarded cancellation path.
///
/// Abandonment during play is also resolved as a refund: nobody is left to infer a
/// winner from.
pub async fn resolve(
    state: &SharedState,
    key: &RoomKey,
) -> Result<AbandonmentOutcome, ServiceError> {
    if state.presence().connection_count(key) > 0 {
        return Ok(AbandonmentOutcome::Reconnected);
    }
    let room = room_service::find_room(state, &key.code).await?;
    if room.game_type != key.game_type {
        return Ok(AbandonmentOutcome::Stale);
    }

    let engine = state.engine().await?;
    match engine
        .cancel_and_refund(&key.code, CancelReason::Abandoned, None)
        .await
    {
        Ok(refund) => {
            room_service::announce_refund(state, &refund, CancelReason::Abandoned);
            Ok(AbandonmentOutcome::Refunded)
        }
        Err(SettlementError::AlreadyTerminal { .. }) => {
            state.channels().publish(
                key,
                ServerMessage::RoomAbandoned {
                    room_code: key.code.clone(),
                    refunded: false,
                },
            );
            Ok(AbandonmentOutcome::AlreadyTerminal)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use rust_decimal_macros::dec;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::MemoryRoomStore,
        services::settlement::{Player, RoomConfig},
        state::{
            AppState,
            room::{Currency, GameType, RoomStatus},
        },
    };

    #[tokio::test(start_paused = true)]
    async fn expired_grace_refunds_everyone_once() {
        let (state, abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        store.fund_wallet("host", Currency::Coins, dec!(500));
        store.fund_wallet("guest", Currency::Coins, dec!(200));

        let room = room_service::create_room(
            &state,
            &Player::new("host", "Host"),
            RoomConfig {
                game_type: GameType::TicTacToe,
                currency: Currency::Coins,
                stake: dec!(100),
                max_players: None,
                is_public: false,
            },
        )
        .await
        .unwrap();
        room_service::join_room(&state, &room.code, &Player::new("guest", "Guest"))
            .await
            .unwrap();

        let key = RoomKey::new(GameType::TicTacToe, room.code.clone());
        let mut socket = state.channels().subscribe(&key);
        state.presence().register(&key, "guest");
        state.presence().unregister(&key, "guest");

        tokio::spawn(run(state.clone(), abandoned));
        let message = timeout(Duration::from_secs(60), socket.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            message,
            ServerMessage::RoomAbandoned { refunded: true, .. }
        ));

        assert_eq!(store.balance("host", Currency::Coins), dec!(500));
        assert_eq!(store.balance("guest", Currency::Coins), dec!(200));
        let stored = room_service::find_room(&state, &room.code).await.unwrap();
        assert_eq!(stored.status, RoomStatus::Cancelled);
        assert_eq!(stored.cancel_reason, Some(CancelReason::Abandoned));

        let again = resolve(&state, &key).await.unwrap();
        assert_eq!(again, AbandonmentOutcome::AlreadyTerminal);
        assert_eq!(store.balance("host", Currency::Coins), dec!(500));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_expiry_keeps_the_room() {
        let (state, abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        store.fund_wallet("host", Currency::Coins, dec!(100));
        store.fund_wallet("guest", Currency::Coins, dec!(100));

        let room = room_service::create_room(
            &state,
            &Player::new("host", "Host"),
            RoomConfig {
                game_type: GameType::TicTacToe,
                currency: Currency::Coins,
                stake: dec!(100),
                max_players: None,
                is_public: false,
            },
        )
        .await
        .unwrap();
        room_service::join_room(&state, &room.code, &Player::new("guest", "Guest"))
            .await
            .unwrap();

        let key = RoomKey::new(GameType::TicTacToe, room.code.clone());
        state.presence().register(&key, "guest");
        state.presence().unregister(&key, "guest");
        tokio::time::sleep(state.config().presence_grace + Duration::from_secs(1)).await;
        state.presence().register(&key, "guest");

        assert_eq!(
            resolve(&state, &key).await.unwrap(),
            AbandonmentOutcome::Reconnected
        );
        tokio::spawn(run(state.clone(), abandoned));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stored = room_service::find_room(&state, &room.code).await.unwrap();
        assert_eq!(stored.status, RoomStatus::Ready);
        assert_eq!(store.balance("guest", Currency::Coins), dec!(0));
        assert_eq!(store.balance("host", Currency::Coins), dec!(0));
    }

    #[tokio::test]
    async fn codes_reused_by_another_game_are_left_alone() {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        store.fund_wallet("host", Currency::Coins, dec!(100));

        let room = room_service::create_room(
            &state,
            &Player::new("host", "Host"),
            RoomConfig {
                game_type: GameType::Cards,
                currency: Currency::Coins,
                stake: dec!(10),
                max_players: None,
                is_public: true,
            },
        )
        .await
        .unwrap();

        let key = RoomKey::new(GameType::Bingo, room.code.clone());
        assert_eq!(
            resolve(&state, &key).await.unwrap(),
            AbandonmentOutcome::Stale
        );
        assert_eq!(store.balance("host", Currency::Coins), dec!(90));
    }
}
