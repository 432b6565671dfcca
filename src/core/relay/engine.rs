//! Per-call relay between the telephony media stream and the model session.
//!
//! The engine waits for `start`, opens and configures one upstream session,
//! then runs two pumps until either side ends the call:
//!
//! - inbound: telephony frames to upstream commands, in arrival order
//! - outbound: upstream events to telephony frames tagged with the stream id
//!
//! Both pumps live in one `tokio::select!` with the downstream close signal,
//! so whichever finishes first cancels the others at an await point. Frames
//! for the caller are only queued to the writer task, never written here.

use futures::{Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::downstream::DownstreamSender;
use super::messages::{CallStart, MediaStreamEvent, MediaStreamOutgoing};
use super::state::{CallSession, CallSummary, EndReason, InboundStats, OutboundStats, RelayState};
use crate::core::persona::{Persona, PersonaResolver};
use crate::core::realtime::{
    OpenAIRealtimeAudioFormat, RealtimeError, RealtimeResult, SessionOptions, SharedConnector,
    UpstreamCloser, UpstreamEvent, UpstreamEvents, UpstreamSender,
};
use crate::core::router::CallRouter;

/// Behaviour switches applied to every call.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Ask the model to greet the caller as soon as the session is configured
    pub opening_utterance: bool,
    /// Send `clear` downstream when the caller talks over the model
    pub clear_on_barge_in: bool,
    pub session_options: SessionOptions,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            opening_utterance: true,
            clear_on_barge_in: true,
            session_options: SessionOptions::default(),
        }
    }
}

/// Runs calls. One engine is shared by all connections; each [`run`]
/// owns its own [`CallSession`].
///
/// [`run`]: RelayEngine::run
pub struct RelayEngine {
    connector: SharedConnector,
    resolver: Arc<PersonaResolver>,
    router: Arc<CallRouter>,
    config: RelayConfig,
}

impl RelayEngine {
    pub fn new(
        connector: SharedConnector,
        resolver: Arc<PersonaResolver>,
        router: Arc<CallRouter>,
        config: RelayConfig,
    ) -> Self {
        Self {
            connector,
            resolver,
            router,
            config,
        }
    }

    /// Relay one call until it ends.
    ///
    /// `inbound` yields the text frames of the telephony connection and ends
    /// when the peer disconnects. `selector` is an explicit persona key from
    /// the connection URL, if any.
    pub async fn run<S, E>(
        &self,
        mut inbound: S,
        downstream: DownstreamSender,
        selector: Option<&str>,
    ) -> CallSummary
    where
        S: Stream<Item = Result<String, E>> + Unpin,
        E: fmt::Display,
    {
        let mut call = CallSession::new();
        let session_id = call.id;
        tracing::debug!(session_id = %session_id, "Awaiting call start");

        let awaited = tokio::select! {
            result = await_start(&mut inbound, &mut call.inbound, session_id) => result,
            _ = downstream.closed() => Err(EndReason::DownstreamClosed),
        };
        let start = match awaited {
            Ok(start) => start,
            Err(reason) => return self.close(call, reason),
        };

        call.transition(RelayState::Active);
        call.stream_sid = Some(start.stream_sid.clone());
        call.call_sid = start.call_sid.clone();
        tracing::info!(
            session_id = %session_id,
            stream_sid = %start.stream_sid,
            call_sid = start.call_sid.as_deref().unwrap_or("-"),
            "Call started"
        );
        let audio_format = call_audio_format(&start);

        let (upstream, mut events, closer) = match self
            .open_upstream(&start, selector, audio_format, &mut call)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    stream_sid = %start.stream_sid,
                    "Failed to open upstream session: {}",
                    e
                );
                return self.close(call, EndReason::UpstreamFailed);
            }
        };

        let stream_sid = start.stream_sid.as_str();
        let reason = tokio::select! {
            reason = pump_inbound(&mut inbound, &upstream, stream_sid, &mut call.inbound) => reason,
            reason = pump_outbound(
                &mut events,
                &downstream,
                stream_sid,
                self.config.clear_on_barge_in,
                &mut call.outbound,
                &mut call.upstream_session_id,
            ) => reason,
            _ = downstream.closed() => EndReason::DownstreamClosed,
        };

        call.transition(RelayState::Draining);
        tracing::debug!(stream_sid = %stream_sid, reason = %reason, "Draining call");
        drop(upstream);
        drop(events);
        closer.close().await;

        self.close(call, reason)
    }

    async fn open_upstream(
        &self,
        start: &CallStart,
        selector: Option<&str>,
        audio_format: OpenAIRealtimeAudioFormat,
        call: &mut CallSession,
    ) -> RealtimeResult<(UpstreamSender, UpstreamEvents, UpstreamCloser)> {
        let route = self.router.route(selector, &start.custom_parameters);
        let resolved = self.resolver.resolve(&route.key);
        let persona = resolved.persona;

        call.persona_key = Some(resolved.key);
        call.persona_name = Some(persona.name.clone());
        tracing::info!(
            stream_sid = %start.stream_sid,
            route = route.source.as_str(),
            key = %route.key,
            persona = %persona.name,
            voice = %persona.voice,
            model = %persona.model,
            "Resolved persona"
        );

        let handle = self.connector.connect(&persona.model).await?;
        let (sender, events, closer) = handle.split();

        if let Err(e) = self.configure(&sender, &persona, audio_format).await {
            closer.close().await;
            return Err(e);
        }

        tracing::info!(
            stream_sid = %start.stream_sid,
            provider = self.connector.provider_name(),
            "Upstream session configured"
        );
        Ok((sender, events, closer))
    }

    async fn configure(
        &self,
        sender: &UpstreamSender,
        persona: &Persona,
        audio_format: OpenAIRealtimeAudioFormat,
    ) -> Result<(), RealtimeError> {
        let options = SessionOptions {
            audio_format,
            ..self.config.session_options.clone()
        };
        sender.configure(persona, &options).await?;
        if self.config.opening_utterance {
            sender.request_opening_utterance(persona).await?;
        }
        Ok(())
    }

    fn close(&self, call: CallSession, reason: EndReason) -> CallSummary {
        let summary = call.finish(reason);
        let duration_ms = summary.duration.as_millis() as u64;

        if reason.is_clean() {
            tracing::info!(
                session_id = %summary.session_id,
                stream_sid = summary.stream_sid.as_deref().unwrap_or("-"),
                reason = %reason,
                duration_ms,
                audio_in = summary.inbound.audio_forwarded,
                audio_out = summary.outbound.audio_frames,
                "Call closed"
            );
        } else {
            tracing::warn!(
                session_id = %summary.session_id,
                stream_sid = summary.stream_sid.as_deref().unwrap_or("-"),
                reason = %reason,
                duration_ms,
                audio_in = summary.inbound.audio_forwarded,
                audio_out = summary.outbound.audio_frames,
                "Call closed abnormally"
            );
        }

        summary
    }
}

/// Session audio format for the encoding the call advertised.
///
/// No advertised encoding means mu-law. An encoding the model cannot take is
/// logged and treated as mu-law; the audio is still forwarded unchanged.
fn call_audio_format(start: &CallStart) -> OpenAIRealtimeAudioFormat {
    let Some(media_format) = start.media_format.as_ref() else {
        return OpenAIRealtimeAudioFormat::G711Ulaw;
    };
    let Some(encoding) = media_format.encoding.as_deref() else {
        return OpenAIRealtimeAudioFormat::G711Ulaw;
    };

    let format = match OpenAIRealtimeAudioFormat::from_telephony_encoding(encoding) {
        Some(format) => format,
        None => {
            tracing::warn!(
                stream_sid = %start.stream_sid,
                encoding,
                "Unsupported telephony encoding, configuring mu-law"
            );
            return OpenAIRealtimeAudioFormat::G711Ulaw;
        }
    };

    if let Some(sample_rate) = media_format.sample_rate
        && sample_rate != format.sample_rate()
    {
        tracing::warn!(
            stream_sid = %start.stream_sid,
            encoding,
            sample_rate,
            expected = format.sample_rate(),
            "Telephony sample rate differs from the session format"
        );
    }
    if format != OpenAIRealtimeAudioFormat::G711Ulaw {
        tracing::info!(stream_sid = %start.stream_sid, format = format.as_str(), "Using call audio format");
    }

    format
}

/// Read frames until a usable `start` arrives.
async fn await_start<S, E>(
    inbound: &mut S,
    stats: &mut InboundStats,
    session_id: Uuid,
) -> Result<CallStart, EndReason>
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Downstream read failed before start: {}", e);
                return Err(EndReason::DownstreamError);
            }
        };
        stats.frames += 1;

        let event = match serde_json::from_str::<MediaStreamEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(session_id = %session_id, "Skipping malformed frame: {}", e);
                continue;
            }
        };

        match event {
            MediaStreamEvent::Start { stream_sid, start } => match CallStart::from_event(stream_sid, start) {
                Some(start) => return Ok(start),
                None => {
                    stats.malformed += 1;
                    tracing::warn!(session_id = %session_id, "Start event without stream identifier, ignoring");
                }
            },
            MediaStreamEvent::Stop { .. } => {
                tracing::warn!(session_id = %session_id, "Stop received before start, closing");
                return Err(EndReason::StopBeforeStart);
            }
            MediaStreamEvent::Media { .. } => {
                stats.audio_ignored += 1;
                tracing::debug!(session_id = %session_id, "Ignoring audio before start");
            }
            MediaStreamEvent::Connected { protocol, version } => {
                tracing::debug!(
                    session_id = %session_id,
                    protocol = protocol.as_deref().unwrap_or("-"),
                    version = version.as_deref().unwrap_or("-"),
                    "Media stream connected"
                );
            }
            other => {
                tracing::debug!(session_id = %session_id, event = other.name(), "Ignoring event before start");
            }
        }
    }

    tracing::debug!(session_id = %session_id, "Downstream closed before start");
    Err(EndReason::DownstreamClosed)
}

/// Telephony frames to upstream commands.
async fn pump_inbound<S, E>(
    inbound: &mut S,
    upstream: &UpstreamSender,
    stream_sid: &str,
    stats: &mut InboundStats,
) -> EndReason
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(stream_sid = %stream_sid, "Downstream read failed: {}", e);
                return EndReason::DownstreamError;
            }
        };
        stats.frames += 1;

        let event = match serde_json::from_str::<MediaStreamEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(stream_sid = %stream_sid, "Skipping malformed frame: {}", e);
                continue;
            }
        };

        let sent = match event {
            MediaStreamEvent::Media { media, .. } => {
                if let Err(e) = media.validate() {
                    stats.malformed += 1;
                    tracing::warn!(stream_sid = %stream_sid, "Skipping audio frame with invalid payload: {}", e);
                    continue;
                }
                let sent = upstream.send_audio_chunk(media.payload).await;
                if sent.is_ok() {
                    stats.audio_forwarded += 1;
                }
                sent
            }
            MediaStreamEvent::Mark { mark, .. } if mark.is_response_marker() => {
                stats.playback_acks += 1;
                tracing::debug!(stream_sid = %stream_sid, mark = %mark.name, "Playback reached mark");
                continue;
            }
            MediaStreamEvent::Mark { mark, .. } => {
                tracing::debug!(stream_sid = %stream_sid, mark = %mark.name, "Caller turn ended");
                let sent = upstream.commit_turn().await;
                if sent.is_ok() {
                    stats.turns_committed += 1;
                }
                sent
            }
            MediaStreamEvent::Stop { .. } => {
                tracing::info!(stream_sid = %stream_sid, "Stop received");
                return EndReason::Stop;
            }
            MediaStreamEvent::Start { .. } => {
                tracing::warn!(stream_sid = %stream_sid, "Ignoring repeated start event");
                continue;
            }
            other => {
                tracing::debug!(stream_sid = %stream_sid, event = other.name(), "Ignoring event");
                continue;
            }
        };

        if let Err(e) = sent {
            tracing::warn!(stream_sid = %stream_sid, "Upstream stopped accepting commands: {}", e);
            return EndReason::UpstreamClosed;
        }
    }

    tracing::info!(stream_sid = %stream_sid, "Downstream disconnected");
    EndReason::DownstreamClosed
}

/// Upstream events to telephony frames.
async fn pump_outbound(
    events: &mut UpstreamEvents,
    downstream: &DownstreamSender,
    stream_sid: &str,
    clear_on_barge_in: bool,
    stats: &mut OutboundStats,
    upstream_session_id: &mut Option<String>,
) -> EndReason {
    while let Some(event) = events.next().await {
        let frame = match event {
            UpstreamEvent::AudioDelta { payload } => {
                stats.audio_frames += 1;
                MediaStreamOutgoing::media(stream_sid, payload)
            }
            UpstreamEvent::ResponseDone { response_id } => {
                stats.responses += 1;
                tracing::debug!(
                    stream_sid = %stream_sid,
                    response_id = response_id.as_deref().unwrap_or("-"),
                    "Response done"
                );
                MediaStreamOutgoing::response_mark(stream_sid, stats.responses)
            }
            UpstreamEvent::SpeechStarted if clear_on_barge_in => {
                stats.clears += 1;
                tracing::debug!(stream_sid = %stream_sid, "Caller barged in, clearing playback");
                MediaStreamOutgoing::clear(stream_sid)
            }
            UpstreamEvent::SpeechStarted | UpstreamEvent::AudioDone => continue,
            UpstreamEvent::SessionReady { session_id } => {
                if let Some(id) = session_id {
                    tracing::debug!(stream_sid = %stream_sid, upstream_session_id = %id, "Upstream session ready");
                    *upstream_session_id = Some(id);
                }
                continue;
            }
            UpstreamEvent::Error {
                kind,
                code,
                message,
                fatal,
            } => {
                stats.upstream_errors += 1;
                let code = code.as_deref().unwrap_or("-");
                if fatal {
                    tracing::error!(stream_sid = %stream_sid, kind = %kind, code, "Fatal upstream error: {}", message);
                    return EndReason::UpstreamFatalError;
                }
                tracing::warn!(stream_sid = %stream_sid, kind = %kind, code, "Upstream error: {}", message);
                continue;
            }
            UpstreamEvent::Closed { reason } => {
                tracing::info!(
                    stream_sid = %stream_sid,
                    reason = reason.as_deref().unwrap_or("-"),
                    "Upstream session closed"
                );
                return EndReason::UpstreamClosed;
            }
        };

        if downstream.send(frame).await.is_err() {
            tracing::debug!(stream_sid = %stream_sid, "Downstream writer gone");
            return EndReason::DownstreamClosed;
        }
    }

    EndReason::UpstreamClosed
}
