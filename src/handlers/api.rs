use axum::{Extension, Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::errors::app_error::{AppError, AppResult};
use crate::middleware::AuthContext;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "call-bridge";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub model: String,
    pub voice: &'static str,
    pub active_calls: usize,
}

/// `GET /`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: SERVICE_NAME,
        model: state.config.default_model.clone(),
        voice: state.config.default_voice.as_str(),
        active_calls: state.active_calls(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub ok: bool,
    pub personas: usize,
}

/// `POST /personas/reload`
///
/// Re-reads the persona directory. Calls already in progress keep the
/// persona they resolved at start.
pub async fn reload_personas(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> AppResult<Json<ReloadResponse>> {
    let store = state.personas.clone();
    let count = tokio::task::spawn_blocking(move || store.reload())
        .await
        .map_err(|e| AppError::Internal(format!("persona reload task failed: {e}")))??;

    tracing::info!(
        auth_id = auth.id.as_deref().unwrap_or("-"),
        personas = count,
        "Personas reloaded"
    );

    Ok(Json(ReloadResponse {
        ok: true,
        personas: count,
    }))
}
