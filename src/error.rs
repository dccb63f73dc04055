// =============================================================================
// AppError — the single error type surfaced across the HTTP boundary
// =============================================================================
//
// Every handler returns `Result<T, AppError>`. Each variant maps to the HTTP
// status spec.md §7 assigns it; the JSON body is always `{ "error": "..." }`
// so clients parse one shape regardless of failure kind. Internal errors are
// logged with `tracing::error!` before their detail is discarded — callers
// never see anything beyond the generic message.
// =============================================================================

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Precondition(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.public_message() });
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn auth_maps_to_401() {
        assert_eq!(AppError::Auth("x".into()).status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_maps_to_502() {
        assert_eq!(AppError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
    }
}
