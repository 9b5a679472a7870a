//! Pipe-delimited data-channel payload codec

/// field separator for data-channel payloads
pub const SEPARATOR: char = '|';

/// keepalive probe, carries the sender's clock in unix millis
pub const PING: &str = "PING";

/// keepalive reply, echoes the probe's timestamp
pub const PONG: &str = "PONG";

/// announced by the host once the data channel opens
pub const CONNECTION_ESTABLISHED: &str = "CONNECTION_ESTABLISHED";

/// application payload prefixes this core delivers to the consumer
pub const APP_PREFIXES: &[&str] = &["POS", "OBJ"];

/// Decoded data-channel payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPayload<'a> {
    /// keepalive probe
    Ping { sent_at: u64 },
    /// keepalive reply
    Pong { sent_at: u64 },
    /// establishment marker with the peer's security flag
    Established { secure: bool },
    /// recognized application payload, delivered verbatim
    App { prefix: &'a str, raw: &'a str },
}

impl<'a> ChannelPayload<'a> {
    #[inline]
    pub fn parse(raw: &'a str) -> Result<Self, &'static str> {
        let (prefix, rest) = match raw.split_once(SEPARATOR) {
            Some((prefix, rest)) => (prefix, rest),
            None => (raw, ""),
        };

        match prefix {
            PING => {
                let sent_at = rest.parse().map_err(|_| "invalid ping timestamp")?;
                Ok(Self::Ping { sent_at })
            }
            PONG => {
                let sent_at = rest.parse().map_err(|_| "invalid pong timestamp")?;
                Ok(Self::Pong { sent_at })
            }
            CONNECTION_ESTABLISHED => match rest {
                "SECURE" => Ok(Self::Established { secure: true }),
                "INSECURE" => Ok(Self::Established { secure: false }),
                _ => Err("invalid security marker"),
            },
            _ if APP_PREFIXES.contains(&prefix) => Ok(Self::App { prefix, raw }),
            _ => Err("unrecognized payload prefix"),
        }
    }
}

/// encode a keepalive probe
#[inline]
pub fn encode_ping(sent_at: u64) -> String {
    format!("{PING}{SEPARATOR}{sent_at}")
}

/// encode a keepalive reply echoing the probe's timestamp
#[inline]
pub fn encode_pong(sent_at: u64) -> String {
    format!("{PONG}{SEPARATOR}{sent_at}")
}

/// encode the establishment marker
#[inline]
pub fn encode_established(secure: bool) -> String {
    let marker = if secure { "SECURE" } else { "INSECURE" };
    format!("{CONNECTION_ESTABLISHED}{SEPARATOR}{marker}")
}
