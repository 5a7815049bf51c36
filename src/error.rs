use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// RpcError
///
/// The full error taxonomy for the RPC façade. Every procedure returns
/// `Result<Json<T>, RpcError>` and every variant carries a human-readable
/// message that the UI displays verbatim.
///
/// All errors are terminal for the triggering request; there is no retry
/// policy and no transient/permanent distinction.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Bad credentials, missing/invalid token, or insufficient role.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The referenced entity does not exist (or is outside the caller's scope).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write violated an application invariant (duplicate username,
    /// follower cap reached).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or incomplete input that survived client-side validation.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Database or other infrastructure failure. The underlying cause is
    /// logged; the caller only sees a generic message.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// The canonical credential-failure error. The message is intentionally
    /// identical for an unknown username and a wrong password so the login
    /// endpoint does not leak which accounts exist.
    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("Invalid Credentials".to_string())
    }
}

/// Wire shape of an error reply: `{"error": "...", "message": "..."}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            RpcError::Unauthorized(msg) => {
                tracing::warn!("unauthorized: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized", msg)
            }
            RpcError::NotFound(msg) => {
                tracing::warn!("not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            RpcError::Conflict(msg) => {
                tracing::warn!("conflict: {}", msg);
                (StatusCode::CONFLICT, "Conflict", msg)
            }
            RpcError::BadRequest(msg) => {
                tracing::warn!("bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            RpcError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal", msg)
            }
        };

        let body = Json(ErrorBody {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
