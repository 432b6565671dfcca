//! OpenAI Realtime API client.
//!
//! [`OpenAIRealtimeConnector`] opens one authenticated WebSocket per call and
//! hands the socket to a spawned task. The task is the only writer to the
//! socket: it serializes queued [`UpstreamCommand`]s in order, answers pings
//! and maps server events to [`UpstreamEvent`]s.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http::HeaderValue;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tokio_util::sync::CancellationToken;
use url::Url;
use zeroize::Zeroize;

use super::config::{OPENAI_BETA_HEADER_VALUE, OPENAI_REALTIME_URL};
use super::messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection, call_modalities};
use crate::core::realtime::base::{
    DEFAULT_CLOSE_TIMEOUT, RealtimeConnector, RealtimeError, RealtimeResult, UpstreamCommand,
    UpstreamEvent, UpstreamHandle,
};

/// Capacity of the command queue feeding the socket task.
const COMMAND_CHANNEL_CAPACITY: usize = 512;

/// Capacity of the event queue drained by the relay.
const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Default bound on connect plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector for the OpenAI Realtime API.
pub struct OpenAIRealtimeConnector {
    api_key: Option<String>,
    base_url: String,
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl Drop for OpenAIRealtimeConnector {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for OpenAIRealtimeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIRealtimeConnector")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl OpenAIRealtimeConnector {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: OPENAI_REALTIME_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Override the endpoint, e.g. to point at a local test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Endpoint URL with the model query parameter.
    pub fn build_ws_url(&self, model: &str) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Invalid realtime URL '{}': {e}", self.base_url))
        })?;
        url.query_pairs_mut().append_pair("model", model);
        Ok(url)
    }

    fn build_request(&self, model: &str, api_key: &str) -> RealtimeResult<http::Request<()>> {
        let url = self.build_ws_url(model)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| RealtimeError::AuthenticationFailed("API key contains invalid characters".to_string()))?;
        bearer.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static(OPENAI_BETA_HEADER_VALUE));

        Ok(request)
    }
}

#[async_trait]
impl RealtimeConnector for OpenAIRealtimeConnector {
    async fn connect(&self, model: &str) -> RealtimeResult<UpstreamHandle> {
        let api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                RealtimeError::AuthenticationFailed("OpenAI API key is not configured".to_string())
            })?;

        let request = self.build_request(model, api_key)?;

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    RealtimeError::Timeout(format!(
                        "Connecting to realtime endpoint took longer than {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(map_connect_error)?;

        tracing::info!(model = %model, "Connected to OpenAI Realtime API");

        let (ws_sink, ws_stream) = ws_stream.split();
        let (command_tx, command_rx) = mpsc::channel::<UpstreamCommand>(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_session_socket(
            ws_sink,
            ws_stream,
            command_rx,
            event_tx,
            shutdown.clone(),
        ));

        Ok(UpstreamHandle::new(command_tx, event_rx, shutdown, Some(task))
            .with_close_timeout(self.close_timeout))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

fn map_connect_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::Http(response)
            if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!(
                "Handshake rejected with status {}",
                response.status()
            ))
        }
        tungstenite::Error::Http(response) => {
            RealtimeError::ConnectionFailed(format!("Handshake rejected with status {}", response.status()))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

/// Wire events for one command, in the order they must be sent.
pub(crate) fn command_to_events(command: UpstreamCommand) -> Vec<ClientEvent> {
    match command {
        UpstreamCommand::Configure { persona, options } => vec![ClientEvent::SessionUpdate {
            session: SessionConfig {
                modalities: Some(call_modalities()),
                instructions: Some(persona.instructions),
                voice: Some(persona.voice.as_str().to_string()),
                input_audio_format: Some(options.audio_format),
                output_audio_format: Some(options.audio_format),
                turn_detection: TurnDetection::for_mode(options.turn_detection),
                temperature: options.temperature,
            },
        }],
        UpstreamCommand::RequestResponse { instructions } => {
            vec![ClientEvent::spoken_response(instructions)]
        }
        UpstreamCommand::AppendAudio { payload } => {
            vec![ClientEvent::InputAudioBufferAppend { audio: payload }]
        }
        UpstreamCommand::CommitTurn => vec![
            ClientEvent::InputAudioBufferCommit,
            ClientEvent::spoken_response(None),
        ],
    }
}

/// Text frame carrying one client event.
pub(crate) fn encode_event(event: &ClientEvent) -> RealtimeResult<Message> {
    serde_json::to_string(event)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| RealtimeError::SerializationError(e.to_string()))
}

/// Provider-neutral view of a server event. `None` for events the relay ignores.
pub(crate) fn server_event_to_upstream(event: ServerEvent) -> Option<UpstreamEvent> {
    match event {
        ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
            Some(UpstreamEvent::SessionReady {
                session_id: session.and_then(|s| s.id),
            })
        }
        ServerEvent::AudioDelta { delta, .. } => Some(UpstreamEvent::AudioDelta { payload: delta }),
        ServerEvent::AudioDone { .. } => Some(UpstreamEvent::AudioDone),
        ServerEvent::ResponseDone { response } => Some(UpstreamEvent::ResponseDone {
            response_id: response.and_then(|r| r.id),
        }),
        ServerEvent::SpeechStarted { .. } => Some(UpstreamEvent::SpeechStarted),
        ServerEvent::Error { error } => {
            let fatal = error.is_fatal();
            Some(UpstreamEvent::Error {
                kind: error.error_type,
                code: error.code,
                message: error.message,
                fatal,
            })
        }
        ServerEvent::Other => None,
    }
}

/// Owns the upstream socket for the lifetime of one session.
async fn run_session_socket<S, R>(
    mut sink: S,
    mut stream: R,
    mut commands: mpsc::Receiver<UpstreamCommand>,
    events: mpsc::Sender<UpstreamEvent>,
    shutdown: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let close_reason: Option<String> = 'session: loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!("Failed to send close frame upstream: {}", e);
                }
                // Closed on request; nobody is listening for a Closed event.
                return;
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                };

                for event in command_to_events(command) {
                    let message = match encode_event(&event) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::error!("Dropping client event: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = sink.send(message).await {
                        tracing::error!("Failed to send upstream message: {}", e);
                        break 'session Some(e.to_string());
                    }
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if let Some(event) = server_event_to_upstream(event)
                                    && events.send(event).await.is_err()
                                {
                                    // Relay went away; stop reading.
                                    let _ = sink.send(Message::Close(None)).await;
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse server event: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Upstream WebSocket closed by server");
                        break 'session frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("Upstream WebSocket error: {}", e);
                        break 'session Some(e.to_string());
                    }
                    None => break 'session None,
                }
            }
        }
    };

    let _ = events
        .send(UpstreamEvent::Closed {
            reason: close_reason,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persona::Persona;
    use crate::core::realtime::base::SessionOptions;
    use crate::core::realtime::openai::{OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, TurnDetectionMode};
    use crate::core::realtime::openai::messages::ApiError;

    #[test]
    fn test_build_ws_url_appends_model() {
        let connector = OpenAIRealtimeConnector::new(Some("sk-test".to_string()));
        let url = connector.build_ws_url("gpt-4o-realtime-preview").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_build_ws_url_rejects_garbage() {
        let connector = OpenAIRealtimeConnector::new(None).with_base_url("not a url");
        assert!(matches!(
            connector.build_ws_url("m"),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_request_carries_auth_and_beta_headers() {
        let connector = OpenAIRealtimeConnector::new(None);
        let request = connector.build_request("gpt-4o-realtime-preview", "sk-test").unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["openai-beta"], "realtime=v1");
        assert!(request.headers().contains_key("sec-websocket-key"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let connector = OpenAIRealtimeConnector::new(Some("   ".to_string()))
            .with_base_url("ws://127.0.0.1:9");
        let result = connector.connect("gpt-4o-realtime-preview").await;
        assert!(matches!(result, Err(RealtimeError::AuthenticationFailed(_))));

        let connector = OpenAIRealtimeConnector::new(None);
        let result = connector.connect("gpt-4o-realtime-preview").await;
        assert!(matches!(result, Err(RealtimeError::AuthenticationFailed(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let connector = OpenAIRealtimeConnector::new(Some("sk-secret".to_string()));
        let debug = format!("{connector:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_configure_maps_to_session_update() {
        let persona = Persona {
            name: "Sara".to_string(),
            voice: OpenAIRealtimeVoice::Sage,
            model: "gpt-4o-realtime-preview".to_string(),
            instructions: "Habla español.".to_string(),
            greeting: None,
        };
        let events = command_to_events(UpstreamCommand::Configure {
            persona,
            options: SessionOptions {
                turn_detection: TurnDetectionMode::Manual,
                temperature: Some(0.7),
                ..Default::default()
            },
        });
        assert_eq!(events.len(), 1);
        let value = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "sage");
        assert_eq!(value["session"]["input_audio_format"], "g711_ulaw");
        assert_eq!(value["session"]["output_audio_format"], "g711_ulaw");
        assert_eq!(value["session"]["instructions"], "Habla español.");
        assert!(value["session"]["turn_detection"].is_null());
        assert!((value["session"]["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_configure_uses_call_audio_format() {
        let persona = Persona {
            name: "Sara".to_string(),
            voice: OpenAIRealtimeVoice::Alloy,
            model: "gpt-4o-realtime-preview".to_string(),
            instructions: "Hola.".to_string(),
            greeting: None,
        };
        let events = command_to_events(UpstreamCommand::Configure {
            persona,
            options: SessionOptions {
                audio_format: OpenAIRealtimeAudioFormat::G711Alaw,
                ..Default::default()
            },
        });
        let value = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(value["session"]["input_audio_format"], "g711_alaw");
        assert_eq!(value["session"]["output_audio_format"], "g711_alaw");
    }

    #[test]
    fn test_encode_event_produces_text_frame() {
        let message = encode_event(&ClientEvent::InputAudioBufferAppend {
            audio: "AAA=".to_string(),
        })
        .unwrap();
        let Message::Text(text) = message else {
            panic!("Expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["audio"], "AAA=");
    }

    #[test]
    fn test_commit_turn_maps_to_commit_then_response() {
        let events = command_to_events(UpstreamCommand::CommitTurn);
        assert_eq!(
            events,
            vec![
                ClientEvent::InputAudioBufferCommit,
                ClientEvent::spoken_response(None)
            ]
        );
    }

    #[test]
    fn test_server_event_mapping() {
        assert_eq!(
            server_event_to_upstream(ServerEvent::AudioDelta {
                response_id: None,
                item_id: None,
                delta: "BBB=".to_string(),
            }),
            Some(UpstreamEvent::AudioDelta {
                payload: "BBB=".to_string()
            })
        );
        assert_eq!(server_event_to_upstream(ServerEvent::Other), None);

        let mapped = server_event_to_upstream(ServerEvent::Error {
            error: ApiError {
                error_type: "server_error".to_string(),
                message: "oops".to_string(),
                ..Default::default()
            },
        });
        assert!(matches!(mapped, Some(UpstreamEvent::Error { fatal: false, .. })));
    }
}
