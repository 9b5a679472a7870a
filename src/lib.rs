//! Peer connection core for realtime play sessions: relay signaling,
//! offer/answer negotiation against an external transport engine, candidate
//! pacing, and data-channel keepalive.

pub mod connection;
pub mod payload;
pub mod signaling;
pub mod transport;
