use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{dto::validation::validate_user_id, error::AppError, services::settlement::Player};

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional display name header; defaults to the user id.
pub const USERNAME_HEADER: &str = "x-username";

/// Authenticated caller of a room endpoint.
#[derive(Debug, Clone)]
pub struct Caller(pub Player);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        let user_id = header(USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("missing user header `{USER_ID_HEADER}`"))
        })?;
        validate_user_id(&user_id)
            .map_err(|err| AppError::Unauthorized(format!("invalid user id: {err}")))?;
        let username = header(USERNAME_HEADER).unwrap_or_else(|| user_id.clone());

        Ok(Caller(Player::new(user_id, username)))
    }
}
