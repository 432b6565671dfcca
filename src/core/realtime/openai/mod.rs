//! OpenAI Realtime API module.
//!
//! Speaks the `realtime=v1` protocol over a WebSocket. Phone calls use
//! G.711 u-law at 8kHz in both directions, so caller audio is forwarded
//! without transcoding and model audio goes straight back to the call.
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse

mod client;
mod config;
pub mod messages;

pub use client::{DEFAULT_CONNECT_TIMEOUT, OpenAIRealtimeConnector};
pub use config::{
    DEFAULT_REALTIME_MODEL, OPENAI_BETA_HEADER_VALUE, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, TurnDetectionMode,
};
pub use messages::{ClientEvent, ServerEvent};
