use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::RelayMessage;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);
const CONNECT_JITTER_MS: u64 = 100;
/// inbound queue depth at which we start complaining
const INBOUND_WARN_DEPTH: usize = 512;

/// Relay-link errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("relay connect failed after {attempts} attempts: {last}")]
    ConnectFailed { attempts: u32, last: String },

    #[error("signaling channel not open")]
    NotOpen,

    #[error("relay send failed: {0}")]
    SendFailed(String),
}

/// Inbound relay-link events, in receipt order
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// one decoded text frame
    Frame(String),
    /// the link went away; `expected` is set when we initiated the close
    Closed { expected: bool },
}

/// Reliable, ordered, bidirectional pipe to the relay server.
///
/// A dedicated reader task decodes inbound frames onto an unbounded queue so
/// the caller never blocks on the socket; the queue survives reconnects, so
/// one [`RelayEvent`] receiver observes the whole life of the link.
pub struct SignalingChannel {
    events_tx: async_channel::Sender<RelayEvent>,
    events_rx: async_channel::Receiver<RelayEvent>,
    writer: Option<mpsc::UnboundedSender<Message>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl Default for SignalingChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingChannel {
    pub fn new() -> Self {
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            events_tx,
            events_rx,
            writer: None,
            reader_task: None,
            writer_task: None,
            open: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dial the relay, with bounded retries and jittered backoff. The link
    /// is never redialed in the background: when this fails the caller has
    /// to ask again.
    pub async fn connect(&mut self, url: &str) -> Result<(), ChannelError> {
        if self.is_open() {
            self.close();
        }

        let mut last = String::new();
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                let backoff = CONNECT_BACKOFF * 2u32.pow(attempt - 1);
                let jitter =
                    Duration::from_millis(rand::rng().random_range(0..CONNECT_JITTER_MS));
                debug!("retrying relay connect in {:?}", backoff + jitter);
                tokio::time::sleep(backoff + jitter).await;
            }

            match tokio_tungstenite::connect_async(url).await {
                Ok((stream, _)) => {
                    self.start(stream);
                    info!("relay link open: {}", url);
                    return Ok(());
                }
                Err(e) => {
                    warn!("relay connect attempt {} failed: {}", attempt + 1, e);
                    last = e.to_string();
                }
            }
        }

        Err(ChannelError::ConnectFailed {
            attempts: CONNECT_ATTEMPTS,
            last,
        })
    }

    fn start(&mut self, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut ws_tx, mut ws_rx) = stream.split();

        self.closing.store(false, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);

        let (writer, mut outbound) = mpsc::unbounded_channel::<Message>();
        self.writer = Some(writer);

        self.writer_task = Some(tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        }));

        let events = self.events_tx.clone();
        let open = Arc::clone(&self.open);
        let closing = Arc::clone(&self.closing);
        self.reader_task = Some(tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let depth = events.len();
                        if depth >= INBOUND_WARN_DEPTH {
                            warn!("inbound signaling queue at {} frames", depth);
                        }
                        if events.send(RelayEvent::Frame(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("close frame from relay");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("relay read error: {}", e);
                        break;
                    }
                }
            }
            open.store(false, Ordering::SeqCst);
            let _ = events
                .send(RelayEvent::Closed {
                    expected: closing.load(Ordering::SeqCst),
                })
                .await;
        }));
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a message for the relay. Fails when the link is not open.
    pub fn send(&self, message: &RelayMessage) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        let writer = self.writer.as_ref().ok_or(ChannelError::NotOpen)?;
        let json = serde_json::to_string(message)
            .expect("RelayMessage serialization should never fail");
        writer
            .send(Message::Text(Utf8Bytes::from(json)))
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    /// The inbound event sequence. Frames keep flowing into the same
    /// receiver across reconnects; each event is delivered once.
    pub fn events(&self) -> async_channel::Receiver<RelayEvent> {
        self.events_rx.clone()
    }

    /// Close the link. Idempotent; a closure we initiated is reported to
    /// the event sequence as expected.
    pub fn close(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        if let Some(writer) = self.writer.take() {
            let _ = writer.send(Message::Close(None));
        }
        // the writer task drains the close frame and ends once its sender
        // is gone; the reader observes the closure and reports it expected
        self.writer_task.take();
        if let Some(task) = self.reader_task.take() {
            // grace period to let the close handshake finish, then reap
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                task.abort();
            });
        }
        debug!("signaling channel closed");
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("open", &self.is_open())
            .field("queued", &self.events_rx.len())
            .finish()
    }
}
