//! Call relay between the telephony media stream and the model session.

mod downstream;
mod engine;
pub mod messages;
mod state;

pub use downstream::{DownstreamClosed, DownstreamSender};
pub use engine::{RelayConfig, RelayEngine};
pub use messages::{CallStart, MediaStreamEvent, MediaStreamOutgoing, RESPONSE_MARK_PREFIX};
pub use state::{CallSession, CallSummary, EndReason, InboundStats, OutboundStats, RelayState};
