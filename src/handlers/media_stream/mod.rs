//! Telephony media stream WebSocket
//!
//! One connection carries one call. Text frames are JSON media stream events
//! (`connected`, `start`, `media`, `mark`, `stop`); the bridge answers with
//! `media`, `mark` and `clear` frames on the same socket. Binary frames are
//! not part of the protocol and are dropped.

mod handler;

pub use handler::{MediaStreamQuery, media_stream_handler, negotiate_subprotocol};
