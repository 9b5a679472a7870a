//! Peer connection orchestration: room coordination, negotiation
//! sequencing, candidate pacing, and the supervising state machine

mod negotiation;
mod pacer;
mod room;
mod router;
mod supervisor;

pub use negotiation::{NegotiationError, Step};
pub use pacer::CandidatePacer;
pub use room::{Role, Room};
pub use supervisor::{
    ConnectError, ConnectOptions, Connection, ConnectionState, LinkError, LinkEvent, SendError,
    MAX_CANDIDATES_PER_TICK, MAX_MESSAGES_PER_TICK,
};
