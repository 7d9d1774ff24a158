use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the installed store and report it together with the live connection count.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let storage_reachable = match state.room_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        None => false,
    };

    HealthResponse::new(
        state.is_degraded().await,
        storage_reachable,
        state.presence().total_connections(),
    )
}
