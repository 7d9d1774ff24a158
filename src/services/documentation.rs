use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the wager rooms backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::list_rooms,
        crate::routes::rooms::get_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::start_room,
        crate::routes::rooms::close_room,
        crate::routes::rooms::lookup_code,
        crate::routes::admin::force_close_room,
        crate::routes::admin::settle_room,
        crate::routes::sse::lobby_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::SettleRoomRequest,
            crate::dto::room::RoomView,
            crate::dto::room::ParticipantView,
            crate::dto::room::RoomListResponse,
            crate::dto::room::StartRoomResponse,
            crate::dto::room::CancelRoomResponse,
            crate::dto::room::SettlementResponse,
            crate::dto::room::CodeLookupResponse,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::LobbyRoomEvent,
            crate::dto::sse::LobbyRoomClosedEvent,
            crate::services::payout::Share,
            crate::services::payout::ShareRole,
            crate::services::payout::SplitPolicy,
            crate::state::room::GameType,
            crate::state::room::Currency,
            crate::state::room::CancelReason,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room lifecycle, escrow and code lookup"),
        (name = "admin", description = "Operator endpoints guarded by X-Admin-Token"),
        (name = "sse", description = "Lobby server-sent events"),
        (name = "realtime", description = "Per-room WebSocket namespace"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_room_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        for path in [
            "/rooms",
            "/rooms/{code}",
            "/rooms/{code}/join",
            "/rooms/{code}/start",
            "/codes/{code}",
            "/admin/rooms/{code}/settle",
            "/sse/lobby",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }
}
