use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::RoomEntity,
    dto::sse::{LobbyRoomClosedEvent, LobbyRoomEvent, ServerEvent, SystemStatus},
    state::{SharedState, room::RoomStatus},
};

const EVENT_ROOM_CREATED: &str = "room.created";
const EVENT_ROOM_UPDATED: &str = "room.updated";
const EVENT_ROOM_CLOSED: &str = "room.closed";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Announce a new public room.
pub fn broadcast_room_created(state: &SharedState, room: &RoomEntity) {
    if !room.is_public {
        return;
    }
    send_lobby_event(state, EVENT_ROOM_CREATED, &LobbyRoomEvent::from(room));
}

/// Refresh a public listing, or close it once the room no longer accepts players.
pub fn broadcast_room_changed(state: &SharedState, room: &RoomEntity) {
    if !room.is_public {
        return;
    }
    match room.status {
        RoomStatus::Waiting | RoomStatus::Ready => {
            send_lobby_event(state, EVENT_ROOM_UPDATED, &LobbyRoomEvent::from(room))
        }
        RoomStatus::Playing | RoomStatus::Finished | RoomStatus::Cancelled => {
            let payload = LobbyRoomClosedEvent {
                code: room.code.clone(),
                game_type: room.game_type,
                status: room.game_type.status_label(room.status).to_owned(),
            };
            send_lobby_event(state, EVENT_ROOM_CLOSED, &payload);
        }
    }
}

/// Tell lobby clients whether room operations are currently available.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_lobby_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

fn send_lobby_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.lobby_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize lobby SSE payload"),
    }
}

/// Forward degraded mode changes to the lobby until the state is dropped.
pub async fn forward_degraded_changes(state: SharedState) {
    let mut watcher = state.degraded_watcher();
    while watcher.changed().await.is_ok() {
        let degraded = *watcher.borrow_and_update();
        broadcast_system_status(&state, degraded);
    }
}
