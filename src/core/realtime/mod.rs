//! Upstream speech model sessions.
//!
//! [`RealtimeConnector`] is the seam between the relay and a concrete provider.
//! The relay only sees [`UpstreamHandle`] and provider-neutral
//! [`UpstreamEvent`]s; the OpenAI implementation lives in [`openai`].

mod base;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

pub use base::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_OPENING_INSTRUCTIONS, RealtimeConnector, RealtimeError,
    RealtimeResult, SessionOptions, UpstreamCloser, UpstreamCommand, UpstreamEvent,
    UpstreamEvents, UpstreamHandle, UpstreamSender,
};
pub use openai::{
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeConnector, OpenAIRealtimeVoice,
    TurnDetectionMode,
};

use crate::config::ServerConfig;

/// Shared connector used by every call.
pub type SharedConnector = Arc<dyn RealtimeConnector>;

/// Build the upstream connector described by the server configuration.
pub fn create_connector(config: &ServerConfig) -> SharedConnector {
    Arc::new(
        OpenAIRealtimeConnector::new(config.openai_api_key.clone())
            .with_base_url(config.realtime_url.clone())
            .with_connect_timeout(Duration::from_secs(config.upstream_connect_timeout_seconds)),
    )
}
