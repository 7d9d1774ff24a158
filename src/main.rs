//! Wager rooms backend entrypoint wiring REST, WebSocket, SSE and the room store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wager_rooms_back::{
    config::AppConfig,
    dao::room_store::{RoomStore, memory::MemoryRoomStore},
    routes,
    services::{abandonment, lobby_events, storage_supervisor, sweep},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let (app_state, abandoned) = AppState::new(config);

    spawn_room_store(app_state.clone());
    tokio::spawn(abandonment::run(app_state.clone(), abandoned));
    tokio::spawn(sweep::run(app_state.clone()));
    tokio::spawn(lobby_events::forward_degraded_changes(app_state.clone()));

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the room store from `ROOM_STORE` and hand it to the storage supervisor.
fn spawn_room_store(state: SharedState) {
    let backend = env::var("ROOM_STORE").unwrap_or_else(|_| default_backend().into());
    match backend.as_str() {
        "memory" => {
            warn!("using the in-memory room store; balances are lost on restart");
            tokio::spawn(storage_supervisor::run(state, || async {
                let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
                Ok(store)
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => spawn_mongo_store(state),
        other => {
            warn!(backend = other, "unknown ROOM_STORE; staying in degraded mode");
        }
    }
}

fn default_backend() -> &'static str {
    if cfg!(feature = "mongo-store") {
        "mongo"
    } else {
        "memory"
    }
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_store(state: SharedState) {
    use wager_rooms_back::dao::{
        room_store::mongodb::{MongoConfig, MongoRoomStore},
        storage::StorageError,
    };

    let mongo_uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let mongo_db = env::var("MONGO_DB").ok();
    let connect_attempts = env::var("MONGO_CONNECT_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok());

    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = mongo_uri.clone();
        let db_name = mongo_db.clone();
        async move {
            let mut config = MongoConfig::from_uri(&uri, db_name.as_deref())
                .await
                .map_err(StorageError::from)?;
            if let Some(attempts) = connect_attempts {
                config = config.with_connect_attempts(attempts);
            }
            let store = MongoRoomStore::connect(config)
                .await
                .map_err(StorageError::from)?;
            let store: Arc<dyn RoomStore> = Arc::new(store);
            Ok(store)
        }
    }));
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
