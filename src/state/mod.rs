pub mod channels;
pub mod presence;
pub mod room;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig, dao::room_store::RoomStore, error::ServiceError,
    services::settlement::SettlementEngine,
};

pub use self::channels::RoomChannels;
pub use self::presence::{AbandonedRooms, PresenceTracker};
pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

const LOBBY_SSE_CAPACITY: usize = 64;

/// Central application state: configuration, the installed storage backend and the
/// process-local realtime registries.
pub struct AppState {
    config: Arc<AppConfig>,
    engine: RwLock<Option<SettlementEngine>>,
    degraded: watch::Sender<bool>,
    presence: PresenceTracker,
    channels: RoomChannels,
    lobby: SseHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply,
    /// together with the receiver of rooms whose grace period expired.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> (SharedState, AbandonedRooms) {
        let (degraded_tx, _rx) = watch::channel(true);
        let (presence, abandoned) = PresenceTracker::new(config.presence_grace);
        let state = Arc::new(Self {
            config: Arc::new(config),
            engine: RwLock::new(None),
            degraded: degraded_tx,
            presence,
            channels: RoomChannels::new(),
            lobby: SseHub::new(LOBBY_SSE_CAPACITY),
        });
        (state, abandoned)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Settlement engine bound to the installed store, or [`ServiceError::Degraded`].
    pub async fn engine(&self) -> Result<SettlementEngine, ServiceError> {
        let guard = self.engine.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.engine.read().await;
        guard.as_ref().map(|engine| engine.store().clone())
    }

    /// Install a new room store and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn RoomStore>) {
        self.install_engine(SettlementEngine::new(store, self.config.clone()))
            .await;
    }

    /// Install a preconfigured engine and leave degraded mode.
    pub async fn install_engine(&self, engine: SettlementEngine) {
        {
            let mut guard = self.engine.write().await;
            *guard = Some(engine);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.engine.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.engine.read().await;
        guard.is_none() || *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Live connections per room.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Per-room broadcast namespaces.
    pub fn channels(&self) -> &RoomChannels {
        &self.channels
    }

    /// Broadcast hub used for the lobby SSE stream.
    pub fn lobby_sse(&self) -> &SseHub {
        &self.lobby
    }
}
