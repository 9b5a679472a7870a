use tracing::{debug, warn};

use crate::payload::ChannelPayload;
use crate::signaling::RelayMessage;

/// capacity of the inbound application-payload queue
const APP_QUEUE_CAPACITY: usize = 256;

/// What a routed data-channel payload asks the supervisor to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PayloadVerdict {
    Ping { sent_at: u64 },
    Pong { sent_at: u64 },
    Established { secure: bool },
    /// application payload queued for the consumer
    Delivered,
    /// unrecognized or overflowing, logged and dropped
    Dropped,
}

/// Demultiplexes inbound traffic: relay frames into typed envelopes,
/// data-channel payloads into control verdicts or the bounded application
/// queue drained once per tick by the consumer.
#[derive(Debug)]
pub(crate) struct MessageRouter {
    app_tx: async_channel::Sender<String>,
    app_rx: async_channel::Receiver<String>,
}

impl MessageRouter {
    pub fn new() -> Self {
        let (app_tx, app_rx) = async_channel::bounded(APP_QUEUE_CAPACITY);
        Self { app_tx, app_rx }
    }

    /// decode one relay frame; malformed input is logged and dropped
    pub fn decode_frame(&self, raw: &str) -> Option<RelayMessage> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("discarding malformed relay frame: {}", e);
                None
            }
        }
    }

    /// classify one data-channel payload, queueing application messages
    pub fn route_payload(&self, raw: &str) -> PayloadVerdict {
        match ChannelPayload::parse(raw) {
            Ok(ChannelPayload::Ping { sent_at }) => PayloadVerdict::Ping { sent_at },
            Ok(ChannelPayload::Pong { sent_at }) => PayloadVerdict::Pong { sent_at },
            Ok(ChannelPayload::Established { secure }) => PayloadVerdict::Established { secure },
            Ok(ChannelPayload::App { .. }) => match self.app_tx.try_send(raw.to_string()) {
                Ok(()) => PayloadVerdict::Delivered,
                Err(_) => {
                    warn!("application queue full, dropping payload");
                    PayloadVerdict::Dropped
                }
            },
            Err(reason) => {
                debug!("dropping data-channel payload: {}", reason);
                PayloadVerdict::Dropped
            }
        }
    }

    /// hand up to `max` queued application payloads to the consumer
    pub fn drain_app(&self, max: usize) -> Vec<String> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.app_rx.try_recv() {
                Ok(message) => out.push(message),
                Err(_) => break,
            }
        }
        out
    }
}
