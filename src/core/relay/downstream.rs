use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::messages::MediaStreamOutgoing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Downstream connection closed")]
pub struct DownstreamClosed;

/// Producer side of the telephony connection.
///
/// Frames are queued to the single task that owns the socket sink, so writes
/// are never interleaved. The writer cancels `closed` when a write fails or
/// the peer goes away.
#[derive(Debug, Clone)]
pub struct DownstreamSender {
    frames: mpsc::Sender<MediaStreamOutgoing>,
    closed: CancellationToken,
}

impl DownstreamSender {
    pub fn new(frames: mpsc::Sender<MediaStreamOutgoing>, closed: CancellationToken) -> Self {
        Self { frames, closed }
    }

    /// Queue a frame for the writer.
    pub async fn send(&self, frame: MediaStreamOutgoing) -> Result<(), DownstreamClosed> {
        if self.closed.is_cancelled() {
            return Err(DownstreamClosed);
        }
        self.frames.send(frame).await.map_err(|_| DownstreamClosed)
    }

    /// Resolves once the writer is gone or has reported a failure.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.closed.cancelled() => {}
            _ = self.frames.closed() => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.frames.is_closed()
    }
}
