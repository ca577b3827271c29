//! Relay error taxonomy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use courier_shared::CryptoError;

/// Errors surfaced by the relay's event and request paths.
///
/// Authentication failures are fatal to the connection attempt only;
/// store failures propagate to whoever initiated the operation.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The handshake or request carried no valid session token
    #[error("authentication rejected: {0}")]
    Auth(#[from] AuthError),

    /// Malformed inbound event; the event is dropped, the connection stays open
    #[error("invalid message event: {0}")]
    Validation(String),

    /// The durable store rejected or failed an operation
    #[error("storage unavailable: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Cipher failure (a stored record that cannot be decrypted, or an
    /// encrypt failure on the write path)
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Attachment payload could not be decoded or written
    #[error("attachment write failed: {0}")]
    AttachmentWrite(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            RelayError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            // Retryable: the store is unavailable, not the request at fault
            RelayError::Persistence(e) => {
                error!("Persistence failure: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage unavailable".to_string(),
                )
            }
            RelayError::Crypto(_) | RelayError::AttachmentWrite(_) => {
                error!("Internal failure: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
