//! Provider-neutral types for the upstream speech model session.
//!
//! A connected session is represented by an [`UpstreamHandle`]. The handle is
//! split into three parts so the relay can drive them independently:
//!
//! - [`UpstreamSender`]: ordered commands (configure, audio, turn commits)
//! - [`UpstreamEvents`]: the lazy, non-restartable stream of server events
//! - [`UpstreamCloser`]: orderly shutdown of the socket task
//!
//! Commands travel over one FIFO channel to the task that owns the socket, so
//! a `configure` issued before any audio is always written first.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::openai::{OpenAIRealtimeAudioFormat, TurnDetectionMode};
use crate::core::persona::Persona;

/// Default time allowed for the socket task to finish after close is requested.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Instruction used for the opening utterance when a persona has no greeting.
pub const DEFAULT_OPENING_INSTRUCTIONS: &str =
    "Greet the caller briefly in your persona's voice and ask how you can help.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to the upstream model.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credential missing or rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A client event could not be encoded for the wire
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The session task is gone; no further commands can be delivered
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session Options
// =============================================================================

/// Knobs applied to a session configuration. The relay fills in
/// `audio_format` per call from the telephony start event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub turn_detection: TurnDetectionMode,
    pub temperature: Option<f32>,
    /// Encoding of the call audio, used for both directions
    pub audio_format: OpenAIRealtimeAudioFormat,
}

// =============================================================================
// Commands and Events
// =============================================================================

/// Commands accepted by the socket task, applied strictly in send order.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    /// Configure voice, audio encoding and instructions for the session
    Configure {
        persona: Persona,
        options: SessionOptions,
    },
    /// Ask the model to speak without waiting for caller input
    RequestResponse { instructions: Option<String> },
    /// Append one already-encoded audio chunk to the input buffer
    AppendAudio { payload: String },
    /// Close the caller's turn and ask for a response
    CommitTurn,
}

/// Events surfaced to the relay, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    SessionReady {
        session_id: Option<String>,
    },
    /// A chunk of synthesized speech, base64 in the session's output format
    AudioDelta {
        payload: String,
    },
    AudioDone,
    /// The model finished a response turn
    ResponseDone {
        response_id: Option<String>,
    },
    /// The caller started talking over the model
    SpeechStarted,
    Error {
        kind: String,
        code: Option<String>,
        message: String,
        fatal: bool,
    },
    /// The connection is gone; no more events follow
    Closed {
        reason: Option<String>,
    },
}

impl fmt::Display for UpstreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamEvent::SessionReady { .. } => write!(f, "session_ready"),
            UpstreamEvent::AudioDelta { .. } => write!(f, "audio_delta"),
            UpstreamEvent::AudioDone => write!(f, "audio_done"),
            UpstreamEvent::ResponseDone { .. } => write!(f, "response_done"),
            UpstreamEvent::SpeechStarted => write!(f, "speech_started"),
            UpstreamEvent::Error { .. } => write!(f, "error"),
            UpstreamEvent::Closed { .. } => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// A connected upstream session.
#[derive(Debug)]
pub struct UpstreamHandle {
    commands: mpsc::Sender<UpstreamCommand>,
    events: mpsc::Receiver<UpstreamEvent>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl UpstreamHandle {
    /// Assemble a handle from the channels of a running session task.
    ///
    /// `task` is `None` when nothing needs to be awaited on close, which is the
    /// case for channel-backed sessions in tests.
    pub fn new(
        commands: mpsc::Sender<UpstreamCommand>,
        events: mpsc::Receiver<UpstreamEvent>,
        shutdown: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            commands,
            events,
            shutdown,
            task,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn split(self) -> (UpstreamSender, UpstreamEvents, UpstreamCloser) {
        (
            UpstreamSender {
                commands: self.commands,
            },
            UpstreamEvents {
                events: self.events,
            },
            UpstreamCloser {
                shutdown: self.shutdown,
                task: self.task,
                close_timeout: self.close_timeout,
            },
        )
    }
}

/// Ordered command side of a session.
#[derive(Debug, Clone)]
pub struct UpstreamSender {
    commands: mpsc::Sender<UpstreamCommand>,
}

impl UpstreamSender {
    /// Send the session configuration. Must precede any audio.
    pub async fn configure(&self, persona: &Persona, options: &SessionOptions) -> RealtimeResult<()> {
        self.send(UpstreamCommand::Configure {
            persona: persona.clone(),
            options: options.clone(),
        })
        .await
    }

    /// Ask the model to greet the caller before they speak.
    pub async fn request_opening_utterance(&self, persona: &Persona) -> RealtimeResult<()> {
        let instructions = persona
            .greeting
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENING_INSTRUCTIONS.to_string());
        self.send(UpstreamCommand::RequestResponse {
            instructions: Some(instructions),
        })
        .await
    }

    /// Append one audio chunk. Returns once the chunk is queued for the socket.
    pub async fn send_audio_chunk(&self, payload: String) -> RealtimeResult<()> {
        self.send(UpstreamCommand::AppendAudio { payload }).await
    }

    /// Commit the input buffer and request a response.
    pub async fn commit_turn(&self) -> RealtimeResult<()> {
        self.send(UpstreamCommand::CommitTurn).await
    }

    async fn send(&self, command: UpstreamCommand) -> RealtimeResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }
}

/// Event side of a session.
#[derive(Debug)]
pub struct UpstreamEvents {
    events: mpsc::Receiver<UpstreamEvent>,
}

impl UpstreamEvents {
    /// Next event, or `None` once the session task has exited.
    pub async fn next(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }
}

/// Shutdown side of a session.
#[derive(Debug)]
pub struct UpstreamCloser {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl UpstreamCloser {
    /// Ask the socket task to send a close frame and wait for it, aborting it
    /// if it does not finish within the close timeout.
    pub async fn close(self) {
        self.shutdown.cancel();

        let Some(mut task) = self.task else {
            return;
        };

        match tokio::time::timeout(self.close_timeout, &mut task).await {
            Ok(Ok(())) => tracing::debug!("Upstream session task finished"),
            Ok(Err(e)) => tracing::warn!("Upstream session task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "Upstream session task did not stop in time, aborting"
                );
                task.abort();
            }
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens upstream sessions. One connect per call.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Establish an authenticated session for `model`.
    async fn connect(&self, model: &str) -> RealtimeResult<UpstreamHandle>;

    /// Provider name for logs.
    fn provider_name(&self) -> &'static str;
}
