use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::ServerError;

/// Errors reported to HTTP clients.
///
/// Every variant maps to a status code and a stable `code` string, so clients can branch on the
/// kind of failure without parsing the message.
#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str),
    Unauthorized,
    Forbidden(&'static str),
    BadRequest(String),
    TournamentFull,
    AlreadyRegistered,
    TeamAlreadyRegistered,
    InsufficientFunds,
    PaymentUnavailable,
    InvalidSignature,
    Upstream(ServerError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use ApiError::*;
        match self {
            NotFound(_) => StatusCode::NOT_FOUND,
            Unauthorized => StatusCode::UNAUTHORIZED,
            Forbidden(_) => StatusCode::FORBIDDEN,
            BadRequest(_) | TournamentFull | InsufficientFunds | InvalidSignature => {
                StatusCode::BAD_REQUEST
            }
            AlreadyRegistered | TeamAlreadyRegistered => StatusCode::CONFLICT,
            PaymentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        use ApiError::*;
        match self {
            NotFound(_) => "not_found",
            Unauthorized => "unauthorized",
            Forbidden(_) => "forbidden",
            BadRequest(_) => "bad_request",
            TournamentFull => "tournament_full",
            AlreadyRegistered | TeamAlreadyRegistered => "already_registered",
            InsufficientFunds => "insufficient_funds",
            PaymentUnavailable => "payment_unavailable",
            InvalidSignature => "invalid_signature",
            Upstream(_) => "internal",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ApiError::*;
        match self {
            NotFound(entity) => write!(f, "{} not found", entity),
            Unauthorized => write!(f, "Authentication required"),
            Forbidden(reason) => write!(f, "{}", reason),
            BadRequest(reason) => write!(f, "{}", reason),
            TournamentFull => write!(f, "Tournament is full"),
            AlreadyRegistered => write!(f, "Already registered for this tournament"),
            TeamAlreadyRegistered => write!(f, "This team is already registered for this tournament"),
            InsufficientFunds => write!(f, "Insufficient wallet balance"),
            PaymentUnavailable => write!(f, "Payment processing is currently unavailable"),
            InvalidSignature => write!(f, "Invalid webhook signature"),
            Upstream(_) => write!(
                f,
                "Something went wrong. Please let the platform team know if the issue persists."
            ),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ServerError> for ApiError {
    fn from(error: ServerError) -> Self {
        ApiError::Upstream(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream(ref cause) = self {
            error!("Error handling request: {:?}", cause);
        }

        let body = Json(json!({
            "message": self.to_string(),
            "code": self.code(),
        }));

        (self.status(), body).into_response()
    }
}
