use std::{sync::Arc, time::Duration};

use rust_decimal_macros::dec;
use serde_json::json;
use tokio::time::timeout;
use wager_rooms_back::{
    config::AppConfig,
    dao::{models::LedgerKind, room_store::RoomStore, room_store::memory::MemoryRoomStore},
    dto::ws::ServerMessage,
    error::SettlementError,
    services::{
        abandonment,
        game_rules::MoveOutcome,
        room_service,
        settlement::{Player, RoomConfig, SettlementEngine},
    },
    state::{
        AppState,
        room::{CancelReason, Currency, GameType, RoomKey, RoomStatus},
    },
};

fn engine() -> (MemoryRoomStore, SettlementEngine) {
    let store = MemoryRoomStore::new();
    let engine = SettlementEngine::new(Arc::new(store.clone()), Arc::new(AppConfig::default()));
    (store, engine)
}

fn tic_tac_toe(stake: rust_decimal::Decimal) -> RoomConfig {
    RoomConfig {
        game_type: GameType::TicTacToe,
        currency: Currency::Coins,
        stake,
        max_players: None,
        is_public: true,
    }
}

#[tokio::test]
async fn host_wins_a_full_game() {
    let (store, engine) = engine();
    store.fund_wallet("host", Currency::Coins, dec!(500));
    store.fund_wallet("guest", Currency::Coins, dec!(200));
    let host = Player::new("host", "Host");
    let guest = Player::new("guest", "Guest");

    let room = engine
        .create_and_escrow(&host, &tic_tac_toe(dec!(100)))
        .await
        .unwrap();
    assert_eq!(store.balance("host", Currency::Coins), dec!(400));
    assert_eq!(room.pot, dec!(100));
    assert_eq!(room.status, RoomStatus::Waiting);

    let room = engine.join_and_escrow(&room.code, &guest).await.unwrap();
    assert_eq!(store.balance("guest", Currency::Coins), dec!(100));
    assert_eq!(room.pot, dec!(200));
    assert_eq!(room.status, RoomStatus::Ready);

    let room = engine.start(&room.code, "host").await.unwrap();
    assert_eq!(room.status, RoomStatus::Playing);

    let moves = [("host", 0), ("guest", 3), ("host", 1), ("guest", 4)];
    for (player, cell) in moves {
        let result = engine
            .record_move(&room.code, player, &json!({ "cell": cell }))
            .await
            .unwrap();
        assert_eq!(result.outcome, MoveOutcome::Continue);
    }
    let last = engine
        .record_move(&room.code, "host", &json!({ "cell": 2 }))
        .await
        .unwrap();

    assert_eq!(last.outcome, MoveOutcome::Winner("host".into()));
    assert_eq!(last.room.status, RoomStatus::Finished);
    assert_eq!(last.room.pot, dec!(0));
    assert_eq!(last.room.winner_id.as_deref(), Some("host"));
    assert_eq!(store.balance("host", Currency::Coins), dec!(600));
    assert_eq!(store.balance("guest", Currency::Coins), dec!(100));

    let rows = store.wallet_transactions(&room.code).await.unwrap();
    let payouts: Vec<_> = rows
        .iter()
        .filter(|row| row.kind == LedgerKind::Payout)
        .collect();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, dec!(200));
}

#[tokio::test(start_paused = true)]
async fn dropped_opponent_refunds_both_players_once() {
    let (state, abandoned) = AppState::new(AppConfig::default());
    let store = MemoryRoomStore::new();
    state.install_store(Arc::new(store.clone())).await;
    store.fund_wallet("host", Currency::Coins, dec!(500));
    store.fund_wallet("guest", Currency::Coins, dec!(200));
    tokio::spawn(abandonment::run(state.clone(), abandoned));

    let room = room_service::create_room(&state, &Player::new("host", "Host"), tic_tac_toe(dec!(100)))
        .await
        .unwrap();
    room_service::join_room(&state, &room.code, &Player::new("guest", "Guest"))
        .await
        .unwrap();

    let key = RoomKey::new(GameType::TicTacToe, room.code.clone());
    let mut namespace = state.channels().subscribe(&key);
    state.presence().register(&key, "guest");
    assert!(state.presence().unregister(&key, "guest"));

    let message = timeout(Duration::from_secs(30), namespace.recv())
        .await
        .expect("abandonment fired within grace")
        .unwrap();
    assert!(matches!(
        message,
        ServerMessage::RoomAbandoned { refunded: true, .. }
    ));

    let stored = room_service::find_room(&state, &room.code).await.unwrap();
    assert_eq!(stored.status, RoomStatus::Cancelled);
    assert_eq!(stored.pot, dec!(0));
    assert_eq!(store.balance("host", Currency::Coins), dec!(500));
    assert_eq!(store.balance("guest", Currency::Coins), dec!(200));

    let refunds = store
        .wallet_transactions(&room.code)
        .await
        .unwrap()
        .into_iter()
        .filter(|row| row.kind == LedgerKind::Refund)
        .count();
    assert_eq!(refunds, 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_within_grace_keeps_the_room() {
    let (state, abandoned) = AppState::new(AppConfig::default());
    let store = MemoryRoomStore::new();
    state.install_store(Arc::new(store.clone())).await;
    store.fund_wallet("host", Currency::Coins, dec!(100));
    tokio::spawn(abandonment::run(state.clone(), abandoned));

    let room = room_service::create_room(&state, &Player::new("host", "Host"), tic_tac_toe(dec!(50)))
        .await
        .unwrap();
    let key = RoomKey::new(GameType::TicTacToe, room.code.clone());
    state.presence().register(&key, "host");
    state.presence().unregister(&key, "host");
    tokio::time::sleep(Duration::from_secs(5)).await;
    state.presence().register(&key, "host");
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stored = room_service::find_room(&state, &room.code).await.unwrap();
    assert_eq!(stored.status, RoomStatus::Waiting);
    assert_eq!(store.balance("host", Currency::Coins), dec!(50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_for_the_last_seat() {
    let (store, engine) = engine();
    store.fund_wallet("host", Currency::Coins, dec!(100));
    store.fund_wallet("a", Currency::Coins, dec!(100));
    store.fund_wallet("b", Currency::Coins, dec!(100));

    let room = engine
        .create_and_escrow(&Player::new("host", "Host"), &tic_tac_toe(dec!(100)))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        {
            let engine = engine.clone();
            let code = room.code.clone();
            tokio::spawn(async move { engine.join_and_escrow(&code, &Player::new("a", "A")).await })
        },
        {
            let engine = engine.clone();
            let code = room.code.clone();
            tokio::spawn(async move { engine.join_and_escrow(&code, &Player::new("b", "B")).await })
        },
    );
    let results = [first.unwrap(), second.unwrap()];

    let joined: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].status, RoomStatus::Ready);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(SettlementError::RoomFull(_))))
    );

    let spent = [
        store.balance("a", Currency::Coins),
        store.balance("b", Currency::Coins),
    ];
    assert!(spent.contains(&dec!(0)));
    assert!(spent.contains(&dec!(100)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_cancel_refunds_once() {
    let (store, engine) = engine();
    store.fund_wallet("host", Currency::Coins, dec!(100));
    store.fund_wallet("guest", Currency::Coins, dec!(100));
    let room = engine
        .create_and_escrow(&Player::new("host", "Host"), &tic_tac_toe(dec!(100)))
        .await
        .unwrap();
    engine
        .join_and_escrow(&room.code, &Player::new("guest", "Guest"))
        .await
        .unwrap();

    let admin = {
        let engine = engine.clone();
        let code = room.code.clone();
        tokio::spawn(async move {
            engine
                .cancel_and_refund(&code, CancelReason::AdminClosed, None)
                .await
        })
    };
    let sweep = {
        let engine = engine.clone();
        let code = room.code.clone();
        tokio::spawn(async move {
            engine
                .cancel_and_refund(&code, CancelReason::Inactive, None)
                .await
        })
    };
    let results = [admin.await.unwrap(), sweep.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SettlementError::AlreadyTerminal {
            status: RoomStatus::Cancelled,
            ..
        })
    )));
    assert_eq!(store.balance("host", Currency::Coins), dec!(100));
    assert_eq!(store.balance("guest", Currency::Coins), dec!(100));
}

#[tokio::test]
async fn active_codes_are_unique_across_games() {
    let (store, engine) = engine();
    let mut codes = std::collections::HashSet::new();
    for (index, game_type) in GameType::ALL.iter().cycle().take(40).enumerate() {
        let host = format!("host-{index}");
        store.fund_wallet(&host, Currency::Fires, dec!(1));
        let room = engine
            .create_and_escrow(
                &Player::new(host.clone(), host),
                &RoomConfig {
                    game_type: *game_type,
                    currency: Currency::Fires,
                    stake: dec!(1),
                    max_players: None,
                    is_public: false,
                },
            )
            .await
            .unwrap();
        assert!(codes.insert(room.code));
    }
}
