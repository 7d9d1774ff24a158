use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{
        room::{Currency, RoomStatus},
        state_machine::InvalidTransition,
    },
};

/// Failures of the settlement engine and the code registry.
///
/// Every variant except [`SettlementError::Storage`] is a business or validation
/// rejection: the surrounding unit of work is rolled back and nothing persists.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Stake outside the accepted bounds of its currency.
    #[error("stake {amount} is not accepted for {currency}")]
    InvalidStake {
        /// Requested denomination.
        currency: Currency,
        /// Rejected stake.
        amount: rust_decimal::Decimal,
    },
    /// Code is not six digits.
    #[error("room code `{0}` is malformed")]
    InvalidRoomCode(String),
    /// No room ever used this code.
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    /// Every seat is taken.
    #[error("room `{0}` is full")]
    RoomFull(String),
    /// The room is playing or terminal.
    #[error("room `{code}` cannot be joined while {status}")]
    RoomNotJoinable {
        /// Room code.
        code: String,
        /// Status at the time of the join.
        status: RoomStatus,
    },
    /// The user already holds a seat.
    #[error("user `{user_id}` already joined room `{code}`")]
    AlreadyJoined {
        /// Room code.
        code: String,
        /// Seated user.
        user_id: String,
    },
    /// The wallet cannot cover the stake.
    #[error("insufficient balance")]
    InsufficientBalance,
    /// Action reserved to the room host.
    #[error("only the host of room `{0}` can do this")]
    NotHost(String),
    /// The user holds no seat in the room.
    #[error("user `{user_id}` is not a participant of room `{code}`")]
    NotParticipant {
        /// Room code.
        code: String,
        /// Rejected user.
        user_id: String,
    },
    /// The lifecycle forbids this event in the current status.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// The room is already settled or cancelled; nothing was moved.
    #[error("room `{code}` is already {status}")]
    AlreadyTerminal {
        /// Room code.
        code: String,
        /// Terminal status already reached.
        status: RoomStatus,
    },
    /// Every drawn candidate was taken.
    #[error("no free room code after {attempts} attempt(s)")]
    CodeSpaceExhausted {
        /// Candidates tried.
        attempts: u32,
    },
    /// Move or outcome rejected by the game rules.
    #[error("invalid move: {0}")]
    InvalidMove(String),
    /// Moves for this game are not validated by the server.
    #[error("game `{0}` has no server-side rules")]
    UnsupportedGame(String),
    /// Storage failure; retried when transient.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SettlementError {
    /// Stable machine-checkable identifier for clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SettlementError::InvalidStake { .. } => "invalid_stake",
            SettlementError::InvalidRoomCode(_) => "invalid_room_code",
            SettlementError::RoomNotFound(_) => "room_not_found",
            SettlementError::RoomFull(_) => "room_full",
            SettlementError::RoomNotJoinable { .. } => "room_not_joinable",
            SettlementError::AlreadyJoined { .. } => "already_joined",
            SettlementError::InsufficientBalance => "insufficient_balance",
            SettlementError::NotHost(_) => "not_host",
            SettlementError::NotParticipant { .. } => "not_participant",
            SettlementError::InvalidTransition(_) => "invalid_transition",
            SettlementError::AlreadyTerminal { .. } => "already_terminal",
            SettlementError::CodeSpaceExhausted { .. } => "code_space_exhausted",
            SettlementError::InvalidMove(_) => "invalid_move",
            SettlementError::UnsupportedGame(_) => "unsupported_game",
            SettlementError::Storage(_) => "storage_unavailable",
        }
    }

    /// Whether the whole unit of work can be replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Storage(err) if err.is_transient())
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The settlement engine refused the operation.
    #[error(transparent)]
    Settlement(SettlementError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<SettlementError> for ServiceError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Storage(source) => ServiceError::Unavailable(source),
            other => ServiceError::Settlement(other),
        }
    }
}

impl ServiceError {
    /// Stable identifier sent to clients alongside the message.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded => "storage_unavailable",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Settlement(err) => err.reason_code(),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest {
            code: "invalid_input",
            message: format!("validation failed: {}", err),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    /// Missing or wrong credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The caller is identified but not allowed to act.
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String },
    /// Not enough funds for the requested stake.
    #[error("payment required: {0}")]
    PaymentRequired(String),
    /// Requested resource not found.
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String },
    /// Conflict with current state.
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },
    /// Service unavailable or degraded.
    #[error("service unavailable: {message}")]
    ServiceUnavailable { code: &'static str, message: String },
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = err.reason_code();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable {
                code,
                message: source.to_string(),
            },
            ServiceError::Degraded => AppError::ServiceUnavailable {
                code,
                message: "degraded mode".into(),
            },
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest { code, message },
            ServiceError::NotFound(message) => AppError::NotFound { code, message },
            ServiceError::Settlement(err) => err.into(),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        let code = err.reason_code();
        let message = err.to_string();
        match err {
            SettlementError::InvalidStake { .. }
            | SettlementError::InvalidRoomCode(_)
            | SettlementError::InvalidMove(_)
            | SettlementError::UnsupportedGame(_) => AppError::BadRequest { code, message },
            SettlementError::RoomNotFound(_) => AppError::NotFound { code, message },
            SettlementError::InsufficientBalance => AppError::PaymentRequired(message),
            SettlementError::NotHost(_) | SettlementError::NotParticipant { .. } => {
                AppError::Forbidden { code, message }
            }
            SettlementError::RoomFull(_)
            | SettlementError::RoomNotJoinable { .. }
            | SettlementError::AlreadyJoined { .. }
            | SettlementError::InvalidTransition(_)
            | SettlementError::AlreadyTerminal { .. } => AppError::Conflict { code, message },
            SettlementError::CodeSpaceExhausted { .. } | SettlementError::Storage(_) => {
                AppError::ServiceUnavailable { code, message }
            }
        }
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, *code),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden { code, .. } => (StatusCode::FORBIDDEN, *code),
            AppError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "insufficient_balance"),
            AppError::NotFound { code, .. } => (StatusCode::NOT_FOUND, *code),
            AppError::Conflict { code, .. } => (StatusCode::CONFLICT, *code),
            AppError::ServiceUnavailable { code, .. } => (StatusCode::SERVICE_UNAVAILABLE, *code),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();

        let payload = Json(ErrorBody {
            error: self.to_string(),
            code,
        });

        (status, payload).into_response()
    }
}
