//! OpenAI Realtime API configuration types.
//!
//! Voices, audio formats and the turn detection modes a phone call can use.

use serde::{Deserialize, Serialize};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Protocol version header value sent on connect.
pub const OPENAI_BETA_HEADER_VALUE: &str = "realtime=v1";

/// Default model when neither the persona nor the configuration names one.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

// =============================================================================
// Voices
// =============================================================================

/// Voices accepted by the Realtime API session configuration.
///
/// Any other value makes the upstream reject `session.update`, so persona
/// voices are parsed into this enum before they reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, case-insensitively. Returns `None` for unsupported names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "alloy" => Some(Self::Alloy),
            "ash" => Some(Self::Ash),
            "ballad" => Some(Self::Ballad),
            "coral" => Some(Self::Coral),
            "echo" => Some(Self::Echo),
            "sage" => Some(Self::Sage),
            "shimmer" => Some(Self::Shimmer),
            "verse" => Some(Self::Verse),
            _ => None,
        }
    }

    /// Get all available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio formats understood by the Realtime API.
///
/// Telephony media streams carry 8 kHz mu-law, so calls use `G711Ulaw` in both
/// directions and payloads pass through without transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeAudioFormat {
    #[serde(rename = "pcm16")]
    Pcm16,
    #[default]
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl OpenAIRealtimeAudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Get the sample rate for this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => 24000,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }

    /// Map a telephony `mediaFormat.encoding` value to the matching API format.
    pub fn from_telephony_encoding(encoding: &str) -> Option<Self> {
        match encoding.to_lowercase().as_str() {
            "audio/x-mulaw" | "mulaw" | "ulaw" | "g711_ulaw" => Some(Self::G711Ulaw),
            "audio/x-alaw" | "alaw" | "g711_alaw" => Some(Self::G711Alaw),
            "audio/l16" | "pcm16" | "linear16" => Some(Self::Pcm16),
            _ => None,
        }
    }
}

// =============================================================================
// Turn Detection
// =============================================================================

/// How the upstream decides that the caller finished speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionMode {
    /// The model's server-side VAD closes turns and starts responses.
    #[default]
    ServerVad,
    /// Turns end only when the telephony side sends a mark.
    Manual,
}

impl TurnDetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerVad => "server_vad",
            Self::Manual => "manual",
        }
    }

    /// Parse from a configuration value. Returns `None` for unknown modes.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "server_vad" | "server" | "vad" => Some(Self::ServerVad),
            "manual" | "none" | "mark" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for TurnDetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
