use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notebook_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Content check failed (disallowed signature, kind mismatch).
    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("File too large (max {max} bytes)")]
    PayloadTooLarge { max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The catalog writer lock could not be taken in time. Retryable.
    #[error("Server busy, please retry")]
    Busy,

    #[error("Asset directory missing: {0}")]
    StoreMissing(String),

    #[error("Catalog is corrupt: {0}")]
    CorruptCatalog(String),

    #[error("Asset storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Record not found".to_string()),
            StoreError::CorruptCatalog(msg) => ServerError::CorruptCatalog(msg),
            other => ServerError::Database(other.to_string()),
        }
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::Rejected(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::StoreMissing(_) | ServerError::CorruptCatalog(_) => StatusCode::CONFLICT,
            ServerError::Storage(_) | ServerError::Database(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Storage(_) => "Asset storage error".to_string(),
            ServerError::Database(_) => "Database error".to_string(),
            ServerError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
