//! Local stand-in for the realtime model endpoint
//!
//! Accepts WebSocket connections, records the handshake headers, hands every
//! JSON client event to the test and sends whatever the test scripts.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::accept_hdr_async;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake details seen by the mock
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    pub uri: String,
    pub authorization: Option<String>,
    pub openai_beta: Option<String>,
}

pub struct MockUpstream {
    pub url: String,
    connections: mpsc::UnboundedReceiver<UpstreamConnection>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let mut captured = CapturedRequest::default();
                    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        let header = |name: &str| {
                            request
                                .headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string)
                        };
                        captured = CapturedRequest {
                            uri: request.uri().to_string(),
                            authorization: header("authorization"),
                            openai_beta: header("openai-beta"),
                        };
                        Ok(response)
                    };
                    let Ok(ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };

                    let (mut write, mut read) = ws.split();
                    let (received_tx, received_rx) = mpsc::unbounded_channel();
                    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

                    let _ = conn_tx.send(UpstreamConnection {
                        request: captured,
                        received: received_rx,
                        outgoing: outgoing_tx,
                    });

                    loop {
                        tokio::select! {
                            message = read.next() => match message {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                                        let _ = received_tx.send(value);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            outgoing = outgoing_rx.recv() => match outgoing {
                                Some(message) => {
                                    let is_close = matches!(message, Message::Close(_));
                                    if write.send(message).await.is_err() || is_close {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            connections: conn_rx,
        }
    }

    pub async fn next_connection(&mut self) -> UpstreamConnection {
        timeout(RECV_TIMEOUT, self.connections.recv())
            .await
            .expect("no upstream connection within timeout")
            .expect("mock upstream stopped")
    }

    /// `None` when nobody connects within `wait`.
    pub async fn try_next_connection(&mut self, wait: Duration) -> Option<UpstreamConnection> {
        timeout(wait, self.connections.recv()).await.ok().flatten()
    }
}

pub struct UpstreamConnection {
    pub request: CapturedRequest,
    received: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl UpstreamConnection {
    /// Next client event, `None` once the client closed the socket.
    pub async fn recv(&mut self) -> Option<Value> {
        timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .expect("no upstream event within timeout")
    }

    /// Next client event, asserting its `type`.
    pub async fn expect(&mut self, event_type: &str) -> Value {
        let event = self
            .recv()
            .await
            .unwrap_or_else(|| panic!("upstream closed while waiting for {event_type}"));
        assert_eq!(event["type"], event_type, "unexpected event {event}");
        event
    }

    /// Waits for the client to close the socket, skipping remaining events.
    pub async fn expect_closed(&mut self) {
        while self.recv().await.is_some() {}
    }

    pub fn send(&self, event: Value) {
        let _ = self.outgoing.send(Message::Text(event.to_string().into()));
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }
}
