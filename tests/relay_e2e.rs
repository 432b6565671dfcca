//! End-to-end relay tests
//!
//! Runs the real HTTP server with the real upstream connector pointed at a
//! local mock of the realtime endpoint, and drives it with a WebSocket client
//! speaking the media stream protocol.

mod mock_upstream;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use call_bridge::core::persona::{InMemoryPersonaStore, PersonaRecord};
use call_bridge::core::realtime::create_connector;
use call_bridge::{ServerConfig, routes, state::AppState};

use mock_upstream::{MockUpstream, RECV_TIMEOUT};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config(upstream_url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.openai_api_key = Some("sk-test".to_string());
    config.realtime_url = upstream_url.to_string();
    config.upstream_connect_timeout_seconds = 5;
    config
}

fn personas() -> InMemoryPersonaStore {
    InMemoryPersonaStore::from_records([
        (
            "inhoustontx",
            PersonaRecord {
                name: Some("Sara".to_string()),
                voice: Some("coral".to_string()),
                instructions: Some("Eres Sara de In Houston Texas.".to_string()),
                ..Default::default()
            },
        ),
        (
            "sales",
            PersonaRecord {
                name: Some("Sam".to_string()),
                instructions: Some("Sales desk.".to_string()),
                ..Default::default()
            },
        ),
    ])
}

async fn spawn_bridge(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let connector = create_connector(&config);
    let state = AppState::with_parts(config, Arc::new(personas()), connector);
    let app = routes::create_app_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/media-stream{query}"))
        .await
        .unwrap();
    ws
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON frame for the caller, `None` once the bridge closes the socket.
async fn next_frame(client: &mut Client) -> Option<Value> {
    loop {
        let message = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("no frame from bridge within timeout");
        match message {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

fn start_frame(stream_sid: &str, params: Value) -> Value {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "streamSid": stream_sid,
            "callSid": "CAcall",
            "tracks": ["inbound"],
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
            "customParameters": params
        },
        "streamSid": stream_sid
    })
}

fn media_frame(stream_sid: &str, payload: &str) -> Value {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": {"track": "inbound", "chunk": "1", "timestamp": "5", "payload": payload}
    })
}

async fn wait_for_idle(state: &AppState) {
    for _ in 0..50 {
        if state.active_calls() == 0 && state.ws_connection_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "call still active: calls={} sockets={}",
        state.active_calls(),
        state.ws_connection_count()
    );
}

#[tokio::test]
async fn test_call_relays_audio_both_ways() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(&upstream.url)).await;

    let mut client = connect(addr, "?bot=inhoustontx").await;
    send(&mut client, json!({"event": "connected", "protocol": "Call", "version": "1.0.0"})).await;
    send(&mut client, start_frame("CA123", json!({}))).await;

    let mut conn = upstream.next_connection().await;
    assert_eq!(conn.request.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(conn.request.openai_beta.as_deref(), Some("realtime=v1"));
    assert!(conn.request.uri.contains("model=gpt-4o-realtime-preview"));

    let update = conn.expect("session.update").await;
    assert_eq!(update["session"]["voice"], "coral");
    assert_eq!(update["session"]["instructions"], "Eres Sara de In Houston Texas.");
    assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
    assert_eq!(update["session"]["output_audio_format"], "g711_ulaw");
    conn.expect("response.create").await;

    send(&mut client, media_frame("CA123", "AAA=")).await;
    let append = conn.expect("input_audio_buffer.append").await;
    assert_eq!(append["audio"], "AAA=");

    conn.send(json!({"type": "response.audio.delta", "response_id": "resp_1", "item_id": "item_1", "delta": "BBB="}));
    assert_eq!(
        next_frame(&mut client).await.unwrap(),
        json!({"event": "media", "streamSid": "CA123", "media": {"payload": "BBB="}})
    );

    conn.send(json!({"type": "response.done", "response": {"id": "resp_1", "status": "completed"}}));
    assert_eq!(
        next_frame(&mut client).await.unwrap(),
        json!({"event": "mark", "streamSid": "CA123", "mark": {"name": "response-1"}})
    );

    conn.send(json!({"type": "input_audio_buffer.speech_started", "item_id": "item_2"}));
    assert_eq!(
        next_frame(&mut client).await.unwrap(),
        json!({"event": "clear", "streamSid": "CA123"})
    );

    send(&mut client, json!({"event": "stop", "streamSid": "CA123"})).await;
    conn.expect_closed().await;
    assert!(next_frame(&mut client).await.is_none());

    wait_for_idle(&state).await;
}

#[tokio::test]
async fn test_called_number_selects_persona() {
    let mut upstream = MockUpstream::start().await;
    let mut config = test_config(&upstream.url);
    config.routes = HashMap::from([("+17135550100".to_string(), "sales".to_string())]);
    config.opening_utterance = false;
    let (addr, _state) = spawn_bridge(config).await;

    let mut client = connect(addr, "").await;
    send(&mut client, start_frame("MZ1", json!({"to": "+1 (713) 555-0100"}))).await;

    let mut conn = upstream.next_connection().await;
    let update = conn.expect("session.update").await;
    assert_eq!(update["session"]["instructions"], "Sales desk.");

    // No opening utterance: the next upstream event is caller audio
    send(&mut client, media_frame("MZ1", "AAA=")).await;
    conn.expect("input_audio_buffer.append").await;
}

#[tokio::test]
async fn test_alaw_call_negotiates_alaw_session() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(&upstream.url)).await;

    let mut client = connect(addr, "").await;
    let mut start = start_frame("CA7", json!({}));
    start["start"]["mediaFormat"]["encoding"] = json!("audio/x-alaw");
    send(&mut client, start).await;

    let mut conn = upstream.next_connection().await;
    let update = conn.expect("session.update").await;
    assert_eq!(update["session"]["input_audio_format"], "g711_alaw");
    assert_eq!(update["session"]["output_audio_format"], "g711_alaw");
}

#[tokio::test]
async fn test_stop_before_start_never_opens_upstream() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(&upstream.url)).await;

    let mut client = connect(addr, "").await;
    send(&mut client, media_frame("CA9", "AAA=")).await;
    send(&mut client, json!({"event": "stop", "streamSid": "CA9"})).await;

    assert!(next_frame(&mut client).await.is_none());
    assert!(
        upstream
            .try_next_connection(Duration::from_millis(300))
            .await
            .is_none()
    );
    wait_for_idle(&state).await;
}

#[tokio::test]
async fn test_missing_api_key_ends_call_at_start() {
    let mut upstream = MockUpstream::start().await;
    let mut config = test_config(&upstream.url);
    config.openai_api_key = None;
    let (addr, state) = spawn_bridge(config).await;

    let mut client = connect(addr, "").await;
    send(&mut client, start_frame("CA1", json!({}))).await;

    assert!(next_frame(&mut client).await.is_none());
    assert!(
        upstream
            .try_next_connection(Duration::from_millis(300))
            .await
            .is_none()
    );
    wait_for_idle(&state).await;
}

#[tokio::test]
async fn test_upstream_close_ends_call() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(&upstream.url)).await;

    let mut client = connect(addr, "").await;
    send(&mut client, start_frame("CA2", json!({}))).await;

    let mut conn = upstream.next_connection().await;
    conn.expect("session.update").await;
    conn.close();

    assert!(next_frame(&mut client).await.is_none());
    wait_for_idle(&state).await;
}

#[tokio::test]
async fn test_fatal_upstream_error_ends_call() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(&upstream.url)).await;

    let mut client = connect(addr, "").await;
    send(&mut client, start_frame("CA3", json!({}))).await;

    let mut conn = upstream.next_connection().await;
    conn.expect("session.update").await;

    conn.send(json!({"type": "error", "error": {"type": "invalid_request_error", "code": "bad_value", "message": "ignored"}}));
    conn.send(json!({"type": "response.audio.delta", "delta": "CCC="}));
    assert_eq!(next_frame(&mut client).await.unwrap()["media"]["payload"], "CCC=");

    conn.send(json!({"type": "error", "error": {"type": "invalid_request_error", "code": "session_expired", "message": "expired"}}));
    assert!(next_frame(&mut client).await.is_none());
}

#[tokio::test]
async fn test_subprotocol_is_echoed() {
    let upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(&upstream.url)).await;

    let mut request = format!("ws://{addr}/media-stream")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "audio.twilio.com".parse().unwrap());

    let (_ws, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("sec-websocket-protocol").unwrap(),
        "audio.twilio.com"
    );
}

#[tokio::test]
async fn test_per_ip_limit_rejects_upgrade() {
    let upstream = MockUpstream::start().await;
    let mut config = test_config(&upstream.url);
    config.max_connections_per_ip = 1;
    let (addr, _state) = spawn_bridge(config).await;

    let _first = connect(addr, "").await;
    let second = connect_async(format!("ws://{addr}/media-stream")).await;
    assert!(second.is_err());
}
