//! Telephony media stream message types.
//!
//! Inbound frames are JSON objects tagged by `event`:
//!
//! ```json
//! {"event":"connected","protocol":"Call","version":"1.0.0"}
//! {"event":"start","streamSid":"MZ..","start":{"streamSid":"MZ..","callSid":"CA..","mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1},"customParameters":{"bot":"inhoustontx"}}}
//! {"event":"media","streamSid":"MZ..","media":{"track":"inbound","payload":"<base64>"}}
//! {"event":"mark","streamSid":"MZ..","mark":{"name":"turn-1"}}
//! {"event":"stop","streamSid":"MZ.."}
//! ```
//!
//! Outbound frames carry the call's stream identifier so the telephony side
//! plays them on the right channel.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Prefix of the marks this service sends after each model response. The
/// telephony side echoes them back once playback reaches them.
pub const RESPONSE_MARK_PREFIX: &str = "response-";

// =============================================================================
// Incoming Messages (telephony -> bridge)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaStreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Dtmf {
        #[serde(default)]
        dtmf: Option<DtmfPayload>,
    },
    #[serde(other)]
    Unknown,
}

impl MediaStreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MediaStreamEvent::Connected { .. } => "connected",
            MediaStreamEvent::Start { .. } => "start",
            MediaStreamEvent::Media { .. } => "media",
            MediaStreamEvent::Mark { .. } => "mark",
            MediaStreamEvent::Stop { .. } => "stop",
            MediaStreamEvent::Dtmf { .. } => "dtmf",
            MediaStreamEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartMetadata {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub tracks: Vec<String>,
    pub media_format: Option<MediaFormat>,
    pub custom_parameters: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaFormat {
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    /// Check that the payload is base64 without keeping the decoded bytes.
    pub fn validate(&self) -> Result<(), base64::DecodeError> {
        BASE64_STANDARD.decode(self.payload.as_bytes()).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

impl MarkPayload {
    /// Whether this mark is the echo of one this service sent.
    pub fn is_response_marker(&self) -> bool {
        self.name.starts_with(RESPONSE_MARK_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub digit: Option<String>,
}

/// Start event contents with the stream identifier already picked.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStart {
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub media_format: Option<MediaFormat>,
    pub custom_parameters: HashMap<String, Value>,
}

impl CallStart {
    /// Build from a start event. The nested `start.streamSid` wins over the
    /// top-level one. Returns `None` when neither is present.
    pub fn from_event(stream_sid: Option<String>, start: StartMetadata) -> Option<Self> {
        let stream_sid = start
            .stream_sid
            .or(stream_sid)
            .filter(|sid| !sid.trim().is_empty())?;
        Some(Self {
            stream_sid,
            call_sid: start.call_sid,
            media_format: start.media_format,
            custom_parameters: start.custom_parameters,
        })
    }
}

// =============================================================================
// Outgoing Messages (bridge -> telephony)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaStreamOutgoing {
    /// Audio to play to the caller
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Marker queued after audio; echoed back when playback reaches it
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Drop any audio still buffered for playback
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl MediaStreamOutgoing {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        MediaStreamOutgoing::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaPayload {
                track: None,
                payload,
            },
        }
    }

    pub fn response_mark(stream_sid: &str, sequence: u64) -> Self {
        MediaStreamOutgoing::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: format!("{RESPONSE_MARK_PREFIX}{sequence}"),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        MediaStreamOutgoing::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_event() {
        let raw = r#"{"event":"start","sequenceNumber":"1","start":{"streamSid":"CA123","callSid":"CAabc","accountSid":"AC1","tracks":["inbound"],"mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1},"customParameters":{"bot":"inhoustontx","to":"+17135550100"}},"streamSid":"CA123"}"#;
        let event: MediaStreamEvent = serde_json::from_str(raw).unwrap();
        let MediaStreamEvent::Start { stream_sid, start } = event else {
            panic!("Expected start event");
        };
        let call = CallStart::from_event(stream_sid, start).unwrap();
        assert_eq!(call.stream_sid, "CA123");
        assert_eq!(call.call_sid.as_deref(), Some("CAabc"));
        assert_eq!(call.media_format.unwrap().sample_rate, Some(8000));
        assert_eq!(call.custom_parameters["bot"], json!("inhoustontx"));
    }

    #[test]
    fn test_start_without_stream_sid() {
        let event: MediaStreamEvent = serde_json::from_str(r#"{"event":"start","start":{}}"#).unwrap();
        let MediaStreamEvent::Start { stream_sid, start } = event else {
            panic!("Expected start event");
        };
        assert!(CallStart::from_event(stream_sid, start).is_none());
    }

    #[test]
    fn test_top_level_stream_sid_is_fallback() {
        let call = CallStart::from_event(Some("MZ1".to_string()), StartMetadata::default()).unwrap();
        assert_eq!(call.stream_sid, "MZ1");
    }

    #[test]
    fn test_parse_media_mark_stop() {
        let media: MediaStreamEvent =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"AAA=","track":"inbound","chunk":"1","timestamp":"5"}}"#)
                .unwrap();
        assert!(matches!(media, MediaStreamEvent::Media { ref media, .. } if media.payload == "AAA="));

        let mark: MediaStreamEvent =
            serde_json::from_str(r#"{"event":"mark","mark":{"name":"turn-1"}}"#).unwrap();
        assert!(matches!(mark, MediaStreamEvent::Mark { ref mark, .. } if !mark.is_response_marker()));

        let stop: MediaStreamEvent = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(stop.name(), "stop");
    }

    #[test]
    fn test_unknown_event_and_malformed_frames() {
        let event: MediaStreamEvent = serde_json::from_str(r#"{"event":"heartbeat"}"#).unwrap();
        assert_eq!(event, MediaStreamEvent::Unknown);

        assert!(serde_json::from_str::<MediaStreamEvent>("not json").is_err());
        assert!(serde_json::from_str::<MediaStreamEvent>(r#"{"event":"media"}"#).is_err());
        assert!(serde_json::from_str::<MediaStreamEvent>(r#"{"payload":"AAA="}"#).is_err());
    }

    #[test]
    fn test_payload_validation() {
        let good = MediaPayload {
            track: None,
            payload: "AAA=".to_string(),
        };
        assert!(good.validate().is_ok());

        let bad = MediaPayload {
            track: None,
            payload: "%%%".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_outgoing_media_shape() {
        let frame = MediaStreamOutgoing::media("CA123", "BBB=".to_string());
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "media", "streamSid": "CA123", "media": {"payload": "BBB="}})
        );
    }

    #[test]
    fn test_outgoing_mark_and_clear_shape() {
        let mark = MediaStreamOutgoing::response_mark("CA123", 2);
        assert_eq!(
            serde_json::to_value(&mark).unwrap(),
            json!({"event": "mark", "streamSid": "CA123", "mark": {"name": "response-2"}})
        );

        let clear = MediaStreamOutgoing::clear("CA123");
        assert_eq!(
            serde_json::to_value(&clear).unwrap(),
            json!({"event": "clear", "streamSid": "CA123"})
        );
    }
}
