//! Durable inactivity sweep: cancels open rooms that have been idle for too long.
//!
//! Presence is memory-only, so a restart forgets every grace timer. The sweep
//! re-derives abandonment from `last_activity_at` and goes through the same guarded
//! cancellation as the presence path.

use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    error::{ServiceError, SettlementError},
    services::room_service,
    state::{
        SharedState,
        room::{CancelReason, RoomKey},
    },
};

/// Run the sweep every `sweep_interval` forever.
pub async fn run(state: SharedState) {
    let period = state.config().sweep_interval.max(Duration::from_secs(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match sweep_once(&state, SystemTime::now()).await {
            Ok(0) => {}
            Ok(cancelled) => info!(cancelled, "inactivity sweep cancelled idle rooms"),
            Err(ServiceError::Degraded) => debug!("inactivity sweep skipped in degraded mode"),
            Err(err) => warn!(error = %err, "inactivity sweep failed"),
        }
    }
}

/// Cancel every open room idle since before `now - inactivity_timeout` that has no
/// live connection in this process. Idleness is checked again under the room lock.
/// Returns the number of rooms cancelled.
pub async fn sweep_once(state: &SharedState, now: SystemTime) -> Result<usize, ServiceError> {
    let engine = state.engine().await?;
    let idle_since = now
        .checked_sub(state.config().inactivity_timeout)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let stale = engine.store().find_stale_rooms(idle_since).await?;

    let mut cancelled = 0;
    for room in stale {
        let key = RoomKey::new(room.game_type, room.code.clone());
        if state.presence().connection_count(&key) > 0 {
            debug!(room = %key, "idle room still has live connections; skipping");
            continue;
        }

        match engine.cancel_idle(&room.code, idle_since).await {
            Ok(Some(refund)) => {
                room_service::announce_refund(state, &refund, CancelReason::Inactive);
                cancelled += 1;
            }
            Ok(None) => {
                debug!(room = %key, "room saw activity after the scan; keeping it");
            }
            Err(SettlementError::AlreadyTerminal { .. }) => {
                debug!(room = %key, "idle room already terminal");
            }
            Err(err) => warn!(room = %key, error = %err, "failed to cancel idle room"),
        }
    }
    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

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

    fn bingo() -> RoomConfig {
        RoomConfig {
            game_type: GameType::Bingo,
            currency: Currency::Fires,
            stake: dec!(1),
            max_players: None,
            is_public: true,
        }
    }

    #[tokio::test]
    async fn idle_rooms_without_presence_are_refunded() {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        store.fund_wallet("idle", Currency::Fires, dec!(3));
        store.fund_wallet("live", Currency::Fires, dec!(3));

        let idle = room_service::create_room(&state, &Player::new("idle", "Idle"), bingo())
            .await
            .unwrap();
        let live = room_service::create_room(&state, &Player::new("live", "Live"), bingo())
            .await
            .unwrap();
        state
            .presence()
            .register(&RoomKey::new(GameType::Bingo, live.code.clone()), "live");

        let later = SystemTime::now() + state.config().inactivity_timeout * 2;
        assert_eq!(sweep_once(&state, later).await.unwrap(), 1);
        assert_eq!(sweep_once(&state, later).await.unwrap(), 0);

        let idle = room_service::find_room(&state, &idle.code).await.unwrap();
        assert_eq!(idle.status, RoomStatus::Cancelled);
        assert_eq!(idle.cancel_reason, Some(CancelReason::Inactive));
        assert_eq!(store.balance("idle", Currency::Fires), dec!(3));

        let live = room_service::find_room(&state, &live.code).await.unwrap();
        assert_eq!(live.status, RoomStatus::Waiting);
        assert_eq!(store.balance("live", Currency::Fires), dec!(2));
    }

    #[tokio::test]
    async fn activity_after_the_scan_keeps_the_room() {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        store.fund_wallet("host", Currency::Fires, dec!(1));
        store.fund_wallet("guest", Currency::Fires, dec!(1));
        let room = room_service::create_room(&state, &Player::new("host", "Host"), bingo())
            .await
            .unwrap();

        let engine = state.engine().await.unwrap();
        let created = room_service::find_room(&state, &room.code).await.unwrap();
        let idle_since = created.last_activity_at + Duration::from_nanos(1);
        assert_eq!(engine.store().find_stale_rooms(idle_since).await.unwrap().len(), 1);

        room_service::join_room(&state, &room.code, &Player::new("guest", "Guest"))
            .await
            .unwrap();
        assert!(engine.cancel_idle(&room.code, idle_since).await.unwrap().is_none());

        let kept = room_service::find_room(&state, &room.code).await.unwrap();
        assert_eq!(kept.status, RoomStatus::Ready);
        assert_eq!(store.balance("guest", Currency::Fires), dec!(0));
    }

    #[tokio::test]
    async fn fresh_rooms_are_kept() {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.install_store(Arc::new(store.clone())).await;
        store.fund_wallet("host", Currency::Fires, dec!(1));
        room_service::create_room(&state, &Player::new("host", "Host"), bingo())
            .await
            .unwrap();

        assert_eq!(sweep_once(&state, SystemTime::now()).await.unwrap(), 0);
    }
}
