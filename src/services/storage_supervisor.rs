use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the room store, then keep probing it. While the store is unreachable
/// the shared state stays degraded and room endpoints answer 503.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("room store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                watch_health(&state, store.as_ref()).await;
                state.clear_store().await;
                warn!("room store lost; reconnecting from scratch");
            }
            Err(err) => {
                warn!(error = %err, "room store connection attempt failed");
            }
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll `store` until it stays unreachable after [`MAX_RECONNECT_ATTEMPTS`].
async fn watch_health(state: &SharedState, store: &dyn RoomStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("room store healthy again; leaving degraded mode");
                    state.update_degraded(false).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "room store health check failed; entering degraded mode");
                state.update_degraded(true).await;
                if !reconnect(store).await {
                    warn!("exhausted room store reconnect attempts");
                    return;
                }
                info!("room store reconnected after health check failure");
                state.update_degraded(false).await;
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(store: &dyn RoomStore) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "room store reconnect attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicBool, Ordering},
        time::SystemTime,
    };

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{CodeReservationEntity, RoomEntity, WalletEntity, WalletTransactionEntity},
            room_store::{UnitOfWork, memory::MemoryRoomStore},
            storage::StorageResult,
        },
        state::{AppState, room::GameType},
    };

    /// Memory store whose health probe can be switched off.
    struct FlakyStore {
        inner: MemoryRoomStore,
        healthy: Arc<AtomicBool>,
    }

    fn outage() -> StorageError {
        StorageError::unavailable("probe failed".into(), io::Error::other("down"))
    }

    impl RoomStore for FlakyStore {
        fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn UnitOfWork>>> {
            self.inner.begin()
        }
        fn find_room(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
            self.inner.find_room(code)
        }
        fn list_open_rooms(
            &self,
            game_type: Option<GameType>,
        ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
            self.inner.list_open_rooms(game_type)
        }
        fn find_stale_rooms(
            &self,
            idle_since: SystemTime,
        ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
            self.inner.find_stale_rooms(idle_since)
        }
        fn find_code(
            &self,
            code: &str,
        ) -> BoxFuture<'static, StorageResult<Option<CodeReservationEntity>>> {
            self.inner.find_code(code)
        }
        fn wallet(&self, user_id: &str) -> BoxFuture<'static, StorageResult<Option<WalletEntity>>> {
            self.inner.wallet(user_id)
        }
        fn wallet_transactions(
            &self,
            reference: &str,
        ) -> BoxFuture<'static, StorageResult<Vec<WalletTransactionEntity>>> {
            self.inner.wallet_transactions(reference)
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            let healthy = self.healthy.load(Ordering::SeqCst);
            Box::pin(async move { if healthy { Ok(()) } else { Err(outage()) } })
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.health_check()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probes_toggle_degraded_mode() {
        let (state, _abandoned) = AppState::new(AppConfig::default());
        let healthy = Arc::new(AtomicBool::new(true));
        let flag = healthy.clone();

        tokio::spawn(run(state.clone(), move || {
            let store: Arc<dyn RoomStore> = Arc::new(FlakyStore {
                inner: MemoryRoomStore::new(),
                healthy: flag.clone(),
            });
            async move { Ok(store) }
        }));

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded().await);

        healthy.store(false, Ordering::SeqCst);
        sleep(HEALTH_POLL_INTERVAL * 2).await;
        assert!(state.is_degraded().await);

        healthy.store(true, Ordering::SeqCst);
        sleep(MAX_DELAY * 4).await;
        assert!(!state.is_degraded().await);
    }
}
