use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::persona::PersonaStoreError;

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Persona store error: {0}")]
    PersonaStore(#[from] PersonaStoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PersonaStore(PersonaStoreError::ReloadUnsupported) => StatusCode::NOT_IMPLEMENTED,
            AppError::PersonaStore(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(error = %self, status = %status, "Request failed");

        (
            status,
            Json(json!({
                "ok": false,
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
