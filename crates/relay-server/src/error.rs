use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_contracts::task::ValidationError;
use serde::Serialize;

/// Synchronous rejections. Nothing is scheduled when intake returns one.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid worker secret")]
    Unauthorized,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<ValidationError> for IntakeError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("intake rejected: bad worker secret");
        } else {
            tracing::info!(error = %self, "intake rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
