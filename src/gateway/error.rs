use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures surfaced by gateway handlers, each mapped to one status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed client input.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// A transcript could not be written.
    #[error("{0}")]
    Persistence(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Persistence(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!("internal error: {e:?}");
                format!("{e:#}")
            }
            ApiError::Persistence(msg) => {
                tracing::error!("persistence error: {msg}");
                msg.clone()
            }
            ApiError::Validation(msg) | ApiError::NotFound(msg) => msg.clone(),
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}
