//! Narrow capability boundary to the external transport engine.
//!
//! The engine owns candidate gathering, encryption, and framing on its own
//! execution contexts; this core only drives the offer/answer exchange and
//! reads completion-order events back through a thread-safe queue.

use async_trait::async_trait;
use thiserror::Error;

/// Error surfaced by the transport engine
#[derive(Debug, Clone, Error)]
#[error("engine error: {0}")]
pub struct EngineError(pub String);

/// Which side of the offer/answer exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// A connectivity candidate in transit, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// What this core needs from the transport engine, and nothing more.
///
/// The supervisor owns the engine handle for the lifetime of one connection
/// attempt; other components only borrow it for the duration of a call.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// prepare the underlying peer connection; negotiation steps may not
    /// run before this completes
    async fn init(&self) -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<String, EngineError>;

    async fn create_answer(&self) -> Result<String, EngineError>;

    async fn set_local_description(
        &self,
        kind: DescriptionKind,
        sdp: &str,
    ) -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        kind: DescriptionKind,
        sdp: &str,
    ) -> Result<(), EngineError>;

    async fn add_remote_candidate(&self, candidate: &CandidateInit) -> Result<(), EngineError>;

    /// send a payload over the data channel; fails without side effects when
    /// the channel is not open
    fn send_payload(&self, payload: &str) -> Result<(), EngineError>;

    async fn close_data_channel(&self) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Engine-side happenings, delivered over a queue into the tick loop rather
/// than mutating shared state from engine callbacks
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// the engine gathered a candidate to forward to the peer
    LocalCandidate(CandidateInit),
    TransportConnected,
    TransportDisconnected,
    TransportFailed(String),
    ChannelOpen,
    ChannelClosed,
    /// inbound data-channel payload
    ChannelMessage(String),
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{CandidateInit, DescriptionKind, EngineError, EngineEvent, SessionEngine};

    /// Scriptable engine: records calls, optionally delays every step, and
    /// can report the transport connected once both descriptions are set.
    pub(crate) struct MockEngine {
        events: async_channel::Sender<EngineEvent>,
        calls: Mutex<Vec<String>>,
        sent: Mutex<Vec<String>>,
        step_delay: Mutex<Option<Duration>>,
        init_delay: Mutex<Option<Duration>>,
        auto_connect: bool,
        local_set: AtomicBool,
        remote_set: AtomicBool,
        channel_open: AtomicBool,
    }

    impl MockEngine {
        /// engine that emits TransportConnected + ChannelOpen on its own
        /// once both descriptions are in place
        pub fn auto() -> (Arc<Self>, async_channel::Receiver<EngineEvent>) {
            Self::build(true)
        }

        /// engine that only does what the test tells it to
        pub fn manual() -> (Arc<Self>, async_channel::Receiver<EngineEvent>) {
            Self::build(false)
        }

        fn build(auto_connect: bool) -> (Arc<Self>, async_channel::Receiver<EngineEvent>) {
            let (events, rx) = async_channel::unbounded();
            let engine = Arc::new(Self {
                events,
                calls: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                step_delay: Mutex::new(None),
                init_delay: Mutex::new(None),
                auto_connect,
                local_set: AtomicBool::new(false),
                remote_set: AtomicBool::new(false),
                channel_open: AtomicBool::new(false),
            });
            (engine, rx)
        }

        /// stall every negotiation step (not init) by this much
        pub fn set_step_delay(&self, delay: Duration) {
            *self.step_delay.lock().unwrap() = Some(delay);
        }

        /// stall engine initialization by this much
        pub fn set_init_delay(&self, delay: Duration) {
            *self.init_delay.lock().unwrap() = Some(delay);
        }

        /// inject an engine event as if a callback fired
        pub fn push(&self, event: EngineEvent) {
            let _ = self.events.try_send(event);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn sent_payloads(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        async fn step(&self, name: &str) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push(name.to_string());
            let delay = *self.step_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }

        fn maybe_connect(&self) {
            if self.auto_connect
                && self.local_set.load(Ordering::SeqCst)
                && self.remote_set.load(Ordering::SeqCst)
            {
                self.channel_open.store(true, Ordering::SeqCst);
                let _ = self.events.try_send(EngineEvent::TransportConnected);
                let _ = self.events.try_send(EngineEvent::ChannelOpen);
            }
        }
    }

    #[async_trait]
    impl SessionEngine for MockEngine {
        async fn init(&self) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("init".to_string());
            let delay = *self.init_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }

        async fn create_offer(&self) -> Result<String, EngineError> {
            self.step("create_offer").await?;
            Ok("sdp:offer".to_string())
        }

        async fn create_answer(&self) -> Result<String, EngineError> {
            self.step("create_answer").await?;
            Ok("sdp:answer".to_string())
        }

        async fn set_local_description(
            &self,
            _kind: DescriptionKind,
            _sdp: &str,
        ) -> Result<(), EngineError> {
            self.step("set_local_description").await?;
            self.local_set.store(true, Ordering::SeqCst);
            self.maybe_connect();
            Ok(())
        }

        async fn set_remote_description(
            &self,
            _kind: DescriptionKind,
            _sdp: &str,
        ) -> Result<(), EngineError> {
            self.step("set_remote_description").await?;
            self.remote_set.store(true, Ordering::SeqCst);
            self.maybe_connect();
            Ok(())
        }

        async fn add_remote_candidate(
            &self,
            candidate: &CandidateInit,
        ) -> Result<(), EngineError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("add_remote_candidate:{}", candidate.candidate));
            Ok(())
        }

        fn send_payload(&self, payload: &str) -> Result<(), EngineError> {
            if !self.channel_open.load(Ordering::SeqCst) {
                return Err(EngineError("data channel not open".to_string()));
            }
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }

        async fn close_data_channel(&self) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("close_data_channel".to_string());
            self.channel_open.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("close".to_string());
            Ok(())
        }
    }
}
