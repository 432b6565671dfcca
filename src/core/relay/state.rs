use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of one relayed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    AwaitingStart,
    Active,
    Draining,
    Closed,
}

impl RelayState {
    /// Allowed transitions. `Closed` is terminal and `Active` is entered at
    /// most once.
    pub fn can_transition_to(self, next: RelayState) -> bool {
        matches!(
            (self, next),
            (RelayState::AwaitingStart, RelayState::Active)
                | (RelayState::AwaitingStart, RelayState::Draining)
                | (RelayState::AwaitingStart, RelayState::Closed)
                | (RelayState::Active, RelayState::Draining)
                | (RelayState::Draining, RelayState::Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::AwaitingStart => "awaiting_start",
            RelayState::Active => "active",
            RelayState::Draining => "draining",
            RelayState::Closed => "closed",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Telephony side sent `stop`
    Stop,
    /// `stop` arrived before any `start`
    StopBeforeStart,
    /// Telephony connection went away
    DownstreamClosed,
    /// Telephony connection failed while reading
    DownstreamError,
    /// Model session closed while the call was active
    UpstreamClosed,
    /// Model reported an error that leaves the session unusable
    UpstreamFatalError,
    /// Model session could not be opened or configured
    UpstreamFailed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Stop => "stop",
            EndReason::StopBeforeStart => "stop_before_start",
            EndReason::DownstreamClosed => "downstream_closed",
            EndReason::DownstreamError => "downstream_error",
            EndReason::UpstreamClosed => "upstream_closed",
            EndReason::UpstreamFatalError => "upstream_fatal_error",
            EndReason::UpstreamFailed => "upstream_failed",
        }
    }

    /// Whether the call ended the way calls normally end.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            EndReason::Stop | EndReason::StopBeforeStart | EndReason::DownstreamClosed
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters kept by the inbound pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InboundStats {
    pub frames: u64,
    pub audio_forwarded: u64,
    pub audio_ignored: u64,
    pub malformed: u64,
    pub turns_committed: u64,
    pub playback_acks: u64,
}

/// Counters kept by the outbound pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboundStats {
    pub audio_frames: u64,
    pub responses: u64,
    pub clears: u64,
    pub upstream_errors: u64,
}

/// Runtime state of one call, owned by the engine running it.
#[derive(Debug)]
pub struct CallSession {
    pub id: Uuid,
    state: RelayState,
    created_at: Instant,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub persona_key: Option<String>,
    pub persona_name: Option<String>,
    pub upstream_session_id: Option<String>,
    pub inbound: InboundStats,
    pub outbound: OutboundStats,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RelayState::AwaitingStart,
            created_at: Instant::now(),
            stream_sid: None,
            call_sid: None,
            persona_key: None,
            persona_name: None,
            upstream_session_id: None,
            inbound: InboundStats::default(),
            outbound: OutboundStats::default(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Move to `next`. Invalid transitions are refused and logged.
    pub fn transition(&mut self, next: RelayState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                session_id = %self.id,
                from = %self.state,
                to = %next,
                "Refusing invalid relay state transition"
            );
            return false;
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "Relay state transition");
        self.state = next;
        true
    }

    /// Enter `Closed` and produce the summary. Passes through `Draining` when
    /// coming from `Active`.
    pub fn finish(mut self, reason: EndReason) -> CallSummary {
        if self.state == RelayState::Active {
            self.transition(RelayState::Draining);
        }
        if self.state != RelayState::Closed {
            self.transition(RelayState::Closed);
        }

        CallSummary {
            session_id: self.id,
            stream_sid: self.stream_sid,
            call_sid: self.call_sid,
            persona_key: self.persona_key,
            persona_name: self.persona_name,
            upstream_session_id: self.upstream_session_id,
            end_reason: reason,
            final_state: self.state,
            duration: self.created_at.elapsed(),
            inbound: self.inbound,
            outbound: self.outbound,
        }
    }
}

/// What is left of a call once it is closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSummary {
    pub session_id: Uuid,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub persona_key: Option<String>,
    pub persona_name: Option<String>,
    pub upstream_session_id: Option<String>,
    pub end_reason: EndReason,
    pub final_state: RelayState,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub inbound: InboundStats,
    pub outbound: OutboundStats,
}

impl CallSummary {
    /// Whether the call got as far as an open, configured upstream session.
    pub fn was_activated(&self) -> bool {
        self.stream_sid.is_some()
            && !matches!(
                self.end_reason,
                EndReason::StopBeforeStart | EndReason::UpstreamFailed
            )
    }
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
