use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, post},
};
use validator::Validate;

use crate::{
    dto::room::{CancelRoomResponse, RoomCodePath, SettleRoomRequest, SettlementResponse},
    error::AppError,
    services::room_service,
    state::{SharedState, room::CancelReason},
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints guarded by the shared admin token.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/rooms/{code}", delete(force_close_room))
        .route("/admin/rooms/{code}/settle", post(settle_room))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Force-close any open room and refund every participant.
#[utoipa::path(
    delete,
    path = "/admin/rooms/{code}",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Configured admin token"),
        ("code" = String, Path, description = "Six digit room code"),
    ),
    responses(
        (status = 200, description = "Room cancelled and refunded", body = CancelRoomResponse),
        (status = 409, description = "Room already terminal"),
    )
)]
pub async fn force_close_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
) -> Result<Json<CancelRoomResponse>, AppError> {
    path.validate()?;
    let response =
        room_service::cancel_room(&state, &path.code, CancelReason::AdminClosed, None).await?;
    Ok(Json(response))
}

/// Report the outcome of a game computed by an external engine and pay it out.
#[utoipa::path(
    post,
    path = "/admin/rooms/{code}/settle",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Configured admin token"),
        ("code" = String, Path, description = "Six digit room code"),
    ),
    request_body = SettleRoomRequest,
    responses(
        (status = 200, description = "Pot distributed", body = SettlementResponse),
        (status = 403, description = "Winner is not a participant"),
        (status = 409, description = "Room not playing or already terminal"),
    )
)]
pub async fn settle_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomCodePath>,
    Json(payload): Json<SettleRoomRequest>,
) -> Result<Json<SettlementResponse>, AppError> {
    path.validate()?;
    payload.validate()?;
    let response = room_service::settle_room(
        &state,
        &path.code,
        payload.winner_id.as_deref(),
        payload.policy,
    )
    .await?;
    Ok(Json(response))
}

/// Ensure the request carries the configured admin token.
async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    match state.config().admin_token.as_deref() {
        Some(token) if token == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid admin token".into())),
        None => Err(AppError::Unauthorized(
            "admin endpoints are disabled: no admin token configured".into(),
        )),
    }
}
