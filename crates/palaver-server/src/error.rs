use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use palaver_shared::InvalidUserId;
use palaver_store::StoreError;

/// The messaging core's error taxonomy, mapped onto HTTP at the boundary.
///
/// Target-offline on the relay path is deliberately *not* here: dropping an
/// ephemeral event for an offline user is a normal outcome, and durable
/// messages reach them via the inbox.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed identifier or missing required field.  Rejected before any
    /// store access.
    #[error("Invalid request: {0}")]
    InvalidArgument(String),

    /// The bearer credential could not be verified.  Never downgraded to a
    /// guest identity.
    #[error("Authentication failed")]
    Unauthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    /// The store could not be reached or failed mid-query.  Transient;
    /// read-path callers may retry, writes must not be blindly retried.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Call infrastructure credentials are missing.  Surfaced at the call
    /// operation so the rest of the system stays usable; clients show
    /// "call unavailable" rather than hanging.
    #[error("Call infrastructure not configured: {0}")]
    CallUnconfigured(String),

    #[allow(dead_code)]
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidArgument(msg) => ServerError::InvalidArgument(msg),
            StoreError::NotFound => ServerError::NotFound("no such record".into()),
            other => ServerError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<InvalidUserId> for ServerError {
    fn from(e: InvalidUserId) -> Self {
        ServerError::InvalidArgument(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::StoreUnavailable(_) => {
                // Details go to the log, not the client.
                tracing::error!(error = %self, "store failure");
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            ServerError::CallUnconfigured(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Internal(_) => {
                tracing::error!(error = %self, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
