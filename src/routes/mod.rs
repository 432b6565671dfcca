pub mod api;
pub mod media_stream;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::{auth_middleware, connection_limit_middleware};
use crate::state::AppState;

/// Every route of the service with its per-route middleware.
///
/// Layer order on the media stream (outer to inner): connection limit then
/// handler. The media stream is not authenticated; the telephony platform
/// cannot send bearer tokens. Connection limits need `ConnectInfo`, so serve
/// with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_app_router(state: Arc<AppState>) -> Router {
    let protected_routes = api::create_api_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    let media_routes = media_stream::create_media_stream_router().layer(
        middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
    );

    api::create_public_router()
        .merge(protected_routes)
        .merge(media_routes)
        .with_state(state)
}
