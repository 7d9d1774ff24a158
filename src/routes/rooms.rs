use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::room::{
        CancelRoomResponse, CodeLookupResponse, CreateRoomRequest, ListRoomsQuery,
        RoomCodePath, RoomListResponse, RoomView, StartRoomResponse,
    },
    error::AppError,
    routes::identity::Caller,
    services::room_service,
    state::{SharedState, room::CancelReason},
};

/// Room lifecycle endpoints for authenticated players.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{code}", get(get_room).delete(close_room))
        .route("/rooms/{code}/join", post(join_room))
        .route("/rooms/{code}/start", post(start_room))
        .route("/codes/{code}", get(lookup_code))
}

/// Create a room and escrow the caller's stake.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("x-username" = Option<String>, Header, description = "Display name"),
    ),
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created and host stake escrowed", body = RoomView),
        (status = 400, description = "Invalid stake or payload"),
        (status = 402, description = "Insufficient balance"),
        (status = 503, description = "Storage unavailable or code space exhausted"),
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Caller(host): Caller,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomView>), AppError> {
    payload.validate()?;
    let room = room_service::create_room(&state, &host, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// List public rooms still collecting participants.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    params(ListRoomsQuery),
    responses((status = 200, description = "Open public rooms, newest first", body = RoomListResponse))
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<RoomListResponse>, AppError> {
    Ok(Json(room_service::list_rooms(&state, query.game_type).await?))
}

/// Snapshot of a room, participants included.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Six digit room code")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomView),
        (status = 404, description = "Unknown room code"),
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
) -> Result<Json<RoomView>, AppError> {
    path.validate()?;
    Ok(Json(room_service::get_room(&state, &path.code).await?))
}

/// Escrow the caller's stake and add them to the room.
#[utoipa::path(
    post,
    path = "/rooms/{code}/join",
    tag = "rooms",
    params(
        ("code" = String, Path, description = "Six digit room code"),
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("x-username" = Option<String>, Header, description = "Display name"),
    ),
    responses(
        (status = 200, description = "Joined", body = RoomView),
        (status = 402, description = "Insufficient balance"),
        (status = 404, description = "Unknown room code"),
        (status = 409, description = "Room full, not joinable or already joined"),
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
    Caller(player): Caller,
) -> Result<Json<RoomView>, AppError> {
    path.validate()?;
    Ok(Json(room_service::join_room(&state, &path.code, &player).await?))
}

/// Start play. Host only.
#[utoipa::path(
    post,
    path = "/rooms/{code}/start",
    tag = "rooms",
    params(
        ("code" = String, Path, description = "Six digit room code"),
        ("x-user-id" = String, Header, description = "Authenticated user id"),
    ),
    responses(
        (status = 200, description = "Room is playing", body = StartRoomResponse),
        (status = 403, description = "Caller is not the host"),
        (status = 409, description = "Room is not ready"),
    )
)]
pub async fn start_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
    Caller(actor): Caller,
) -> Result<Json<StartRoomResponse>, AppError> {
    path.validate()?;
    Ok(Json(
        room_service::start_room(&state, &path.code, &actor.user_id).await?,
    ))
}

/// Close an unstarted room and refund every participant. Host only.
#[utoipa::path(
    delete,
    path = "/rooms/{code}",
    tag = "rooms",
    params(
        ("code" = String, Path, description = "Six digit room code"),
        ("x-user-id" = String, Header, description = "Authenticated user id"),
    ),
    responses(
        (status = 200, description = "Room cancelled and refunded", body = CancelRoomResponse),
        (status = 403, description = "Caller is not the host"),
        (status = 409, description = "Room already started or terminal"),
    )
)]
pub async fn close_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
    Caller(actor): Caller,
) -> Result<Json<CancelRoomResponse>, AppError> {
    path.validate()?;
    let response = room_service::cancel_room(
        &state,
        &path.code,
        CancelReason::HostClosed,
        Some(&actor.user_id),
    )
    .await?;
    Ok(Json(response))
}

/// Resolve a code through the cross-game registry.
#[utoipa::path(
    get,
    path = "/codes/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Six digit room code")),
    responses(
        (status = 200, description = "Latest reservation of the code", body = CodeLookupResponse),
        (status = 404, description = "Code never reserved"),
    )
)]
pub async fn lookup_code(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
) -> Result<Json<CodeLookupResponse>, AppError> {
    path.validate()?;
    Ok(Json(room_service::lookup_code(&state, &path.code).await?))
}
