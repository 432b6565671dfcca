use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Public routes (no auth)
pub fn create_public_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(api::health_check))
}

/// Admin routes
///
/// Authentication middleware is applied by [`create_app_router`] once state
/// is available.
///
/// [`create_app_router`]: super::create_app_router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/personas/reload", post(api::reload_personas))
        .layer(TraceLayer::new_for_http())
}
