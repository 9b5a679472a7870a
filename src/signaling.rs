//! WebSocket signaling link to the relay server

mod channel;
mod messages;

pub use channel::{ChannelError, RelayEvent, SignalingChannel};
pub use messages::{RelayMessage, SignalData, SignalKind};
