//! Error types for the HTTP admin surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use breakwater_core::{BreakwaterError, ParseError, QueueError, StoreError, ValidationError};
use tracing::{error, warn};

/// Handler errors with HTTP status code mapping
///
/// Maps admin operation failures onto REST conventions:
///
/// - `400 Bad Request`: invalid names, ids, or configuration values
/// - `404 Not Found`: the referenced dependency, alert, or operation
///   does not exist
/// - `429 Too Many Requests`: queue backpressure
/// - `500 Internal Server Error`: unexpected store or system failures
/// - `503 Service Unavailable`: transient store failures worth retrying
///
/// Store failure details are logged server-side; the client receives a
/// sanitized message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A request field failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A path or body value could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Queue backpressure or queue bookkeeping failure
    #[error("Queue error: {0}")]
    Queue(QueueError),

    /// Persistence failure outside the not-found case
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Unexpected server failure
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::NotFound { id } => Self::NotFound {
                entity: "operation".to_string(),
                id: id.as_str(),
            },
            QueueError::Store(store) => Self::from(store),
            other => Self::Queue(other),
        }
    }
}

impl From<BreakwaterError> for ApiError {
    fn from(error: BreakwaterError) -> Self {
        match error {
            BreakwaterError::Validation(e) => Self::Validation(e),
            BreakwaterError::Parse(e) => Self::Parse(e),
            BreakwaterError::Store(e) => Self::from(e),
            BreakwaterError::Queue(e) => Self::from(e),
            BreakwaterError::Configuration { message } => Self::Internal { message },
            BreakwaterError::Internal { message } => Self::Internal { message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            Self::Validation(_) | Self::Parse(_) => {
                (StatusCode::BAD_REQUEST, self.to_string(), None)
            }
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), None),
            Self::Queue(QueueError::QueueFull { capacity }) => {
                warn!(capacity, "Queue backpressure surfaced to the admin API");
                (StatusCode::TOO_MANY_REQUESTS, self.to_string(), Some(30))
            }
            Self::Queue(ref e) => {
                warn!(error = %e, "Queue error in admin handler");
                (StatusCode::CONFLICT, self.to_string(), None)
            }
            Self::Store(ref e) if e.is_transient() => {
                warn!(error = %e, "Transient store failure in admin handler");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Persistence temporarily unavailable. Please retry.".to_string(),
                    Some(30),
                )
            }
            Self::Store(ref e) => {
                error!(error = %e, "Store failure in admin handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Persistence failure. Details have been logged.".to_string(),
                    None,
                )
            }
            Self::Internal { ref message } => {
                error!(error = %message, "Internal error in admin handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error occurred. Please try again later.".to_string(),
                    None,
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_seconds) = retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

/// Server lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Invalid server configuration: {message}")]
    Configuration { message: String },
}
