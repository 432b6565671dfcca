//! Media stream WebSocket route
//!
//! `GET /media-stream[?bot=<key>]` upgrades to a WebSocket speaking the
//! Twilio Media Streams protocol. One connection is one call.
//!
//! ```json
//! // Telephony platform sends
//! {"event": "start", "start": {"streamSid": "MZ...", "callSid": "CA...", "customParameters": {"to": "+17135550100"}}}
//! {"event": "media", "streamSid": "MZ...", "media": {"payload": "<base64 mulaw>"}}
//!
//! // Bridge answers
//! {"event": "media", "streamSid": "MZ...", "media": {"payload": "<base64 mulaw>"}}
//! {"event": "mark", "streamSid": "MZ...", "mark": {"name": "response-1"}}
//! {"event": "clear", "streamSid": "MZ..."}
//! ```

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

pub fn create_media_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
