//! HTTP and WebSocket request handlers
//!
//! - `api` - health check and persona reload
//! - `media_stream` - telephony media stream WebSocket

pub mod api;
pub mod media_stream;

pub use media_stream::media_stream_handler;
