use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::negotiation::{Negotiation, NegotiationError, StepOutcome, StepResult};
use super::pacer::CandidatePacer;
use super::room::{Role, Room, RoomCoordinator, RoomEvent};
use super::router::{MessageRouter, PayloadVerdict};
use crate::payload;
use crate::signaling::{
    ChannelError, RelayEvent, RelayMessage, SignalData, SignalKind, SignalingChannel,
};
use crate::transport::{CandidateInit, EngineError, EngineEvent, SessionEngine};

/// keepalive cadence on the data channel
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
/// cadence of buffered remote-candidate release
const PACER_INTERVAL: Duration = Duration::from_millis(100);
/// spacing between locally generated candidates on the relay link
const LOCAL_CANDIDATE_SPACING: Duration = Duration::from_millis(5);

/// ceiling on application payloads handed out per tick
pub const MAX_MESSAGES_PER_TICK: usize = 10;
/// ceiling on remote candidates released per drain
pub const MAX_CANDIDATES_PER_TICK: usize = 5;

/// Top-level connection lifecycle. Owned exclusively by [`Connection`];
/// everything else reports events and the supervisor transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    ConnectingSignaling,
    AwaitingPeer,
    Negotiating,
    Connected,
    Closing,
    Failed,
}

/// Parameters for one connection attempt
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub role: Role,
    /// required for [`Role::Client`]; hosts get theirs from the relay
    pub room_id: String,
    /// stamped on outbound signals and the establishment marker
    pub secure: bool,
}

impl ConnectOptions {
    pub fn host(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: Role::Host,
            room_id: String::new(),
            secure: false,
        }
    }

    pub fn client(url: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: Role::Client,
            room_id: room_id.into(),
            secure: false,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// Errors from the initial dial
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Relay(#[from] ChannelError),
}

/// Errors from sending on the data channel
#[derive(Debug, Error)]
pub enum SendError {
    #[error("data channel not open")]
    NotOpen,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failures surfaced through [`LinkEvent::Error`]
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("relay link error: {0}")]
    Relay(String),

    #[error("relay reported: {0}")]
    RelayReported(String),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("transport error: {0}")]
    Transport(String),
}

/// User-visible happenings, returned from [`Connection::tick`]
#[derive(Debug, Clone)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    PeerJoined,
    PeerLeft,
    /// the peer's establishment marker arrived on the data channel
    Established { secure: bool },
    /// round-trip time measured from a keepalive pong
    Latency(Duration),
    Error(LinkError),
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// applies remote candidates one at a time so enqueue order is preserved
fn spawn_candidate_applier(
    engine: Arc<dyn SessionEngine>,
    mut rx: mpsc::UnboundedReceiver<CandidateInit>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            if let Err(e) = engine.add_remote_candidate(&candidate).await {
                warn!("failed to apply remote candidate: {}", e);
            }
        }
    })
}

/// Drives one connection attempt end to end: relay signaling in, engine
/// events in, negotiation steps out, keepalive while connected.
///
/// All state mutation happens on the caller's tick; I/O lives on spawned
/// tasks and reaches the supervisor through queues. A fresh attempt is a
/// fresh `Connection` — dropping or closing this one cancels everything
/// that belonged to it.
pub struct Connection {
    state: ConnectionState,
    options: ConnectOptions,
    coordinator: RoomCoordinator,

    channel: SignalingChannel,
    relay_rx: async_channel::Receiver<RelayEvent>,

    engine: Arc<dyn SessionEngine>,
    engine_rx: async_channel::Receiver<EngineEvent>,

    negotiation: Negotiation,
    steps_rx: mpsc::UnboundedReceiver<StepResult>,
    init_rx: Option<oneshot::Receiver<Result<(), EngineError>>>,
    init_task: Option<JoinHandle<()>>,

    router: MessageRouter,
    pacer: CandidatePacer,
    applier_tx: mpsc::UnboundedSender<CandidateInit>,
    applier_task: Option<JoinHandle<()>>,

    engine_ready: bool,
    start_when_ready: bool,
    held_remote_offer: Option<String>,
    local_description_set: bool,
    outbound_candidates: VecDeque<CandidateInit>,
    data_open: bool,
    closing: bool,

    last_ping: Instant,
    last_drain: Instant,
    last_candidate_sent: Instant,
    last_rtt: Option<Duration>,
}

impl Connection {
    /// Dial the relay and join (or create) the room. Engine initialization
    /// runs in the background; negotiation waits for it.
    pub async fn connect(
        options: ConnectOptions,
        engine: Arc<dyn SessionEngine>,
        engine_events: async_channel::Receiver<EngineEvent>,
    ) -> Result<Self, ConnectError> {
        info!("connecting as {:?} via {}", options.role, options.url);

        let mut channel = SignalingChannel::new();
        channel.connect(&options.url).await?;

        let coordinator = RoomCoordinator::new(options.role, options.room_id.clone());
        channel.send(&coordinator.join_message())?;

        let (steps_tx, steps_rx) = mpsc::unbounded_channel();
        let negotiation = Negotiation::new(Arc::clone(&engine), steps_tx);

        let (init_tx, init_rx) = oneshot::channel();
        let init_engine = Arc::clone(&engine);
        let init_task = tokio::spawn(async move {
            let _ = init_tx.send(init_engine.init().await);
        });

        let (applier_tx, applier_rx) = mpsc::unbounded_channel();
        let applier_task = spawn_candidate_applier(Arc::clone(&engine), applier_rx);

        let relay_rx = channel.events();
        let now = Instant::now();

        let mut connection = Self {
            state: ConnectionState::ConnectingSignaling,
            options,
            coordinator,
            channel,
            relay_rx,
            engine,
            engine_rx: engine_events,
            negotiation,
            steps_rx,
            init_rx: Some(init_rx),
            init_task: Some(init_task),
            router: MessageRouter::new(),
            pacer: CandidatePacer::new(),
            applier_tx,
            applier_task: Some(applier_task),
            engine_ready: false,
            start_when_ready: false,
            held_remote_offer: None,
            local_description_set: false,
            outbound_candidates: VecDeque::new(),
            data_open: false,
            closing: false,
            last_ping: now,
            last_drain: now,
            last_candidate_sent: now,
            last_rtt: None,
        };

        let mut events = Vec::new();
        connection.transition(ConnectionState::AwaitingPeer, &mut events);
        Ok(connection)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn room(&self) -> &Room {
        self.coordinator.room()
    }

    /// last measured keepalive round trip
    pub fn latency(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Process everything queued since the last tick and run the timers.
    /// This is the only place connection state changes.
    pub fn tick(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        if matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Failed
        ) {
            return events;
        }

        self.poll_init(&mut events);
        self.drain_relay(&mut events);
        self.drain_engine(&mut events);
        self.drain_steps(&mut events);
        self.run_timers(&mut events);
        events
    }

    /// Drain up to [`MAX_MESSAGES_PER_TICK`] inbound application payloads.
    pub fn poll_messages(&mut self) -> Vec<String> {
        self.router.drain_app(MAX_MESSAGES_PER_TICK)
    }

    /// Send an application payload over the data channel.
    pub fn send(&self, payload: &str) -> Result<(), SendError> {
        if !self.data_open {
            return Err(SendError::NotOpen);
        }
        self.engine.send_payload(payload)?;
        Ok(())
    }

    /// Tear the connection down. Idempotent, callable from any state; every
    /// cleanup step is attempted even if an earlier one fails.
    pub async fn close(&mut self) {
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Closing) {
            return;
        }
        let from_failed = self.state == ConnectionState::Failed;
        let mut events = Vec::new();
        if !from_failed {
            self.transition(ConnectionState::Closing, &mut events);
        }

        self.teardown_local();
        if let Err(e) = self.engine.close_data_channel().await {
            debug!("data channel close: {}", e);
        }
        if let Err(e) = self.engine.close().await {
            debug!("engine close: {}", e);
        }

        if !from_failed {
            self.transition(ConnectionState::Idle, &mut events);
        }
    }

    fn transition(&mut self, next: ConnectionState, events: &mut Vec<LinkEvent>) {
        if self.state == next {
            return;
        }
        info!("connection state {:?} -> {:?}", self.state, next);
        self.state = next;
        events.push(LinkEvent::StateChanged(next));
    }

    fn fail(&mut self, error: LinkError, events: &mut Vec<LinkEvent>) {
        if self.state == ConnectionState::Failed {
            return;
        }
        warn!("connection failed: {}", error);
        events.push(LinkEvent::Error(error));

        self.teardown_local();
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(e) = engine.close_data_channel().await {
                debug!("data channel close: {}", e);
            }
            if let Err(e) = engine.close().await {
                debug!("engine close: {}", e);
            }
        });

        self.transition(ConnectionState::Failed, events);
    }

    /// the synchronous teardown steps, each attempted independently
    fn teardown_local(&mut self) {
        self.closing = true;
        self.negotiation.cancel_all();
        if let Some(task) = self.init_task.take() {
            task.abort();
        }
        self.init_rx = None;
        if let Some(task) = self.applier_task.take() {
            task.abort();
        }
        self.channel.close();
        self.pacer.clear();
        self.outbound_candidates.clear();
        self.data_open = false;
        self.start_when_ready = false;
        self.held_remote_offer = None;
    }

    fn poll_init(&mut self, events: &mut Vec<LinkEvent>) {
        let Some(rx) = self.init_rx.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(())) => {
                self.init_rx = None;
                self.engine_ready = true;
                debug!("transport engine initialized");
                if self.start_when_ready {
                    self.start_when_ready = false;
                    self.begin_negotiation(events);
                }
                if let Some(sdp) = self.held_remote_offer.take() {
                    self.accept_offer(sdp, events);
                }
            }
            Ok(Err(e)) => {
                self.init_rx = None;
                self.fail(LinkError::Transport(e.to_string()), events);
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.init_rx = None;
                self.fail(
                    LinkError::Transport("engine init task dropped".to_string()),
                    events,
                );
            }
        }
    }

    fn drain_relay(&mut self, events: &mut Vec<LinkEvent>) {
        while let Ok(event) = self.relay_rx.try_recv() {
            match event {
                RelayEvent::Frame(raw) => {
                    if let Some(message) = self.router.decode_frame(&raw) {
                        self.on_relay_message(message, events);
                    }
                }
                RelayEvent::Closed { expected } => {
                    if expected || self.closing {
                        debug!("relay link closed");
                    } else {
                        self.fail(
                            LinkError::Relay("link closed unexpectedly".to_string()),
                            events,
                        );
                    }
                }
            }
            if self.state == ConnectionState::Failed {
                break;
            }
        }
    }

    fn on_relay_message(&mut self, message: RelayMessage, events: &mut Vec<LinkEvent>) {
        match &message {
            RelayMessage::Signal { signal, .. } => {
                let signal = signal.clone();
                self.on_signal(signal, events);
                return;
            }
            RelayMessage::Error { message: text, .. } => {
                let text = text.clone().unwrap_or_default();
                warn!("relay error: {}", text);
                events.push(LinkEvent::Error(LinkError::RelayReported(text)));
                return;
            }
            _ => {}
        }

        match self.coordinator.handle(&message) {
            Some(RoomEvent::Assigned | RoomEvent::Joined) => {}
            Some(RoomEvent::StartNegotiation) => {
                events.push(LinkEvent::PeerJoined);
                if self.engine_ready {
                    self.begin_negotiation(events);
                } else {
                    debug!("peer joined before engine init, holding negotiation");
                    self.start_when_ready = true;
                }
            }
            Some(RoomEvent::PeerJoined) => events.push(LinkEvent::PeerJoined),
            Some(RoomEvent::PeerLeft) => {
                info!("peer left the room");
                events.push(LinkEvent::PeerLeft);
            }
            None => debug!("ignoring relay message: {:?}", message),
        }
    }

    fn begin_negotiation(&mut self, events: &mut Vec<LinkEvent>) {
        if self.state != ConnectionState::AwaitingPeer {
            warn!("ignoring negotiation trigger in state {:?}", self.state);
            return;
        }
        self.coordinator.lock();
        self.transition(ConnectionState::Negotiating, events);
        if let Err(e) = self.negotiation.start_offer() {
            warn!("cannot start negotiation: {}", e);
        }
    }

    fn accept_offer(&mut self, sdp: String, events: &mut Vec<LinkEvent>) {
        if self.state != ConnectionState::AwaitingPeer {
            warn!("ignoring offer in state {:?}", self.state);
            return;
        }
        self.coordinator.lock();
        self.transition(ConnectionState::Negotiating, events);
        if let Err(e) = self.negotiation.apply_remote_offer(sdp) {
            warn!("cannot apply offer: {}", e);
        }
    }

    fn on_signal(&mut self, signal: SignalData, events: &mut Vec<LinkEvent>) {
        match signal.kind {
            SignalKind::Offer => {
                let Some(sdp) = signal.sdp else {
                    warn!("offer signal without sdp");
                    return;
                };
                if self.coordinator.role() == Role::Host {
                    warn!("ignoring offer while hosting");
                    return;
                }
                if self.engine_ready {
                    self.accept_offer(sdp, events);
                } else {
                    debug!("offer before engine init, holding");
                    self.held_remote_offer = Some(sdp);
                }
            }

            SignalKind::Answer => {
                let Some(sdp) = signal.sdp else {
                    warn!("answer signal without sdp");
                    return;
                };
                if let Err(e) = self.negotiation.apply_remote_answer(sdp) {
                    warn!("cannot apply answer: {}", e);
                }
            }

            SignalKind::Candidate => {
                let Some(candidate) = signal.to_candidate() else {
                    warn!("candidate signal without candidate");
                    return;
                };
                if self.pacer.is_unlocked() && self.pacer.is_empty() {
                    // remote description already in place and no backlog
                    // ahead of it, apply directly
                    let _ = self.applier_tx.send(candidate);
                } else {
                    self.pacer.enqueue(candidate);
                }
            }
        }
    }

    fn drain_engine(&mut self, events: &mut Vec<LinkEvent>) {
        while let Ok(event) = self.engine_rx.try_recv() {
            match event {
                EngineEvent::LocalCandidate(candidate) => {
                    self.outbound_candidates.push_back(candidate);
                }
                EngineEvent::TransportConnected => {
                    if self.state == ConnectionState::Negotiating {
                        self.transition(ConnectionState::Connected, events);
                        self.last_ping = Instant::now();
                    } else {
                        debug!("transport connected in state {:?}", self.state);
                    }
                }
                EngineEvent::TransportDisconnected => {
                    if !self.closing {
                        self.fail(
                            LinkError::Transport("transport disconnected".to_string()),
                            events,
                        );
                    }
                }
                EngineEvent::TransportFailed(reason) => {
                    if !self.closing {
                        self.fail(LinkError::Transport(reason), events);
                    }
                }
                EngineEvent::ChannelOpen => {
                    self.data_open = true;
                    debug!("data channel open");
                    if self.coordinator.role() == Role::Host {
                        let marker = payload::encode_established(self.options.secure);
                        if let Err(e) = self.engine.send_payload(&marker) {
                            warn!("could not send establishment marker: {}", e);
                        }
                    }
                }
                EngineEvent::ChannelClosed => {
                    self.data_open = false;
                    if !self.closing {
                        self.fail(LinkError::Transport("data channel closed".to_string()), events);
                    }
                }
                EngineEvent::ChannelMessage(raw) => self.on_channel_message(&raw, events),
            }
            if self.state == ConnectionState::Failed {
                break;
            }
        }
    }

    fn on_channel_message(&mut self, raw: &str, events: &mut Vec<LinkEvent>) {
        match self.router.route_payload(raw) {
            PayloadVerdict::Ping { sent_at } => {
                // every ping gets exactly one immediate pong
                if let Err(e) = self.engine.send_payload(&payload::encode_pong(sent_at)) {
                    warn!("pong send failed: {}", e);
                }
            }
            PayloadVerdict::Pong { sent_at } => {
                if let Some(rtt) = unix_millis().checked_sub(sent_at) {
                    let rtt = Duration::from_millis(rtt);
                    self.last_rtt = Some(rtt);
                    events.push(LinkEvent::Latency(rtt));
                }
            }
            PayloadVerdict::Established { secure } => {
                info!("peer reports connection established, secure={}", secure);
                events.push(LinkEvent::Established { secure });
            }
            PayloadVerdict::Delivered | PayloadVerdict::Dropped => {}
        }
    }

    fn drain_steps(&mut self, events: &mut Vec<LinkEvent>) {
        while let Ok((direction, result)) = self.steps_rx.try_recv() {
            self.negotiation.complete(direction);
            match result {
                Ok(StepOutcome::OfferReady { sdp }) => {
                    self.local_description_set = true;
                    self.send_signal(SignalData::offer(sdp, self.options.secure), events);
                }
                Ok(StepOutcome::AnswerReady { sdp }) => {
                    self.local_description_set = true;
                    self.send_signal(SignalData::answer(sdp, self.options.secure), events);
                }
                Ok(StepOutcome::RemoteOfferApplied) => {
                    self.pacer.unlock();
                    debug!(
                        "remote offer applied, {} buffered candidates eligible",
                        self.pacer.len()
                    );
                    if let Err(e) = self.negotiation.start_answer() {
                        warn!("cannot start answer: {}", e);
                    }
                }
                Ok(StepOutcome::RemoteAnswerApplied) => {
                    self.pacer.unlock();
                    debug!(
                        "remote answer applied, {} buffered candidates eligible",
                        self.pacer.len()
                    );
                }
                Err(error) => {
                    self.fail(LinkError::Negotiation(error), events);
                }
            }
            if self.state == ConnectionState::Failed {
                break;
            }
        }
    }

    fn send_signal(&mut self, signal: SignalData, events: &mut Vec<LinkEvent>) {
        let message = RelayMessage::Signal {
            room_id: self.coordinator.room().id.clone(),
            signal,
        };
        if let Err(e) = self.channel.send(&message) {
            self.fail(LinkError::Relay(e.to_string()), events);
        }
    }

    fn run_timers(&mut self, events: &mut Vec<LinkEvent>) {
        // buffered remote candidates, bounded batch per drain
        if self.last_drain.elapsed() >= PACER_INTERVAL {
            self.last_drain = Instant::now();
            for candidate in self.pacer.drain_ready(MAX_CANDIDATES_PER_TICK) {
                let _ = self.applier_tx.send(candidate);
            }
        }

        // locally generated candidates go out once the local description
        // exists, spaced to keep the relay link calm
        if self.local_description_set
            && !self.outbound_candidates.is_empty()
            && self.last_candidate_sent.elapsed() >= LOCAL_CANDIDATE_SPACING
        {
            if let Some(candidate) = self.outbound_candidates.pop_front() {
                self.last_candidate_sent = Instant::now();
                self.send_signal(
                    SignalData::candidate(&candidate, self.options.secure),
                    events,
                );
            }
        }

        // keepalive; missing pongs are not fatal on their own
        if self.state == ConnectionState::Connected
            && self.data_open
            && self.last_ping.elapsed() >= KEEPALIVE_INTERVAL
        {
            self.last_ping = Instant::now();
            if let Err(e) = self.engine.send_payload(&payload::encode_ping(unix_millis())) {
                warn!("keepalive send failed: {}", e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.negotiation.cancel_all();
        if let Some(task) = self.init_task.take() {
            task.abort();
        }
        if let Some(task) = self.applier_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("room", self.coordinator.room())
            .field("data_open", &self.data_open)
            .finish()
    }
}
