use axum::{
    extract::{
        Extension, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header::SEC_WEBSOCKET_PROTOCOL},
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt, future};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::relay::{DownstreamSender, EndReason, MediaStreamOutgoing};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Frames queued for the caller before the engine waits on the writer
const DOWNSTREAM_BUFFER_SIZE: usize = 256;

/// Twilio media frames are small; anything near this is not a media stream
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct MediaStreamQuery {
    /// Explicit persona key, overrides routing
    pub bot: Option<String>,
}

/// Pick the subprotocol to answer with.
///
/// The first entry of `allowed` that the peer offered wins. With an empty
/// allow-list the peer's first offer is echoed. `None` when the peer offered
/// nothing or nothing acceptable.
pub fn negotiate_subprotocol(headers: &HeaderMap, allowed: &[String]) -> Option<String> {
    let offered: Vec<&str> = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    if allowed.is_empty() {
        return offered.first().map(|token| token.to_string());
    }

    allowed
        .iter()
        .find(|candidate| offered.iter().any(|token| *token == candidate.as_str()))
        .cloned()
}

/// Returns the connection-limit slot when the socket is done.
///
/// Created before the upgrade so an aborted upgrade still releases the slot.
struct ConnectionGuard {
    state: Arc<AppState>,
    ip: Option<IpAddr>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(ip) = self.ip {
            self.state.release_connection(ip);
        }
    }
}

/// `GET /media-stream`
///
/// Upgrades to a WebSocket and relays the call through the engine.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaStreamQuery>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
) -> Response {
    let guard = ConnectionGuard {
        state: state.clone(),
        ip: client_ip.map(|Extension(ClientIp(ip))| ip),
    };

    let selector = query
        .bot
        .map(|bot| bot.trim().to_string())
        .filter(|bot| !bot.is_empty());
    let protocol = negotiate_subprotocol(&headers, &state.config.media_subprotocols);

    debug!(
        bot = selector.as_deref().unwrap_or("-"),
        protocol = protocol.as_deref().unwrap_or("-"),
        "Media stream upgrade requested"
    );

    let ws = ws.max_message_size(MAX_WS_MESSAGE_SIZE);
    let ws = match protocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    ws.on_upgrade(move |socket| handle_media_socket(socket, state, selector, guard))
}

async fn handle_media_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    selector: Option<String>,
    _guard: ConnectionGuard,
) {
    info!("Media stream connected");
    state.call_started();

    let (sink, stream) = socket.split();
    let (frame_tx, frame_rx) = mpsc::channel::<MediaStreamOutgoing>(DOWNSTREAM_BUFFER_SIZE);
    let closed = CancellationToken::new();
    let discard = CancellationToken::new();

    let writer = tokio::spawn(write_frames(sink, frame_rx, closed.clone(), discard.clone()));

    let inbound = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
        .boxed();

    let downstream = DownstreamSender::new(frame_tx, closed);
    let summary = state
        .engine
        .run(inbound, downstream, selector.as_deref())
        .await;

    // The caller hung up; audio still queued has nowhere to play
    if summary.end_reason == EndReason::Stop {
        discard.cancel();
    }

    if let Err(e) = writer.await {
        warn!("Media stream writer task failed: {}", e);
    }
    state.call_ended();

    debug!(
        session_id = %summary.session_id,
        reason = summary.end_reason.as_str(),
        relayed = summary.was_activated(),
        "Media stream closed"
    );
}

/// Sole writer of the media stream socket.
///
/// Sends queued frames until every sender is gone, then a close frame.
/// Once `discard` fires, frames still queued are dropped. A failed write
/// cancels `closed` so the engine stops producing.
async fn write_frames<S>(
    mut sink: S,
    mut frames: mpsc::Receiver<MediaStreamOutgoing>,
    closed: CancellationToken,
    discard: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    loop {
        let frame = tokio::select! {
            biased;

            _ = discard.cancelled() => {
                let dropped = frames.len();
                if dropped > 0 {
                    debug!(dropped, "Discarding frames queued after stop");
                }
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize media stream frame: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!("Failed to write to media stream: {}", e);
            closed.cancel();
            return;
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("Media stream close frame not delivered: {}", e);
    }
    closed.cancel();
}
