use serde::{Deserialize, Serialize};

use crate::transport::CandidateInit;

/// Payload kind inside a `signal` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// Session-negotiation payload carried by a `signal` envelope.
///
/// `sdp_mline_index` is optional on purpose: absent on the wire means "not
/// applicable", while 0 is a real media-line index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalData {
    #[serde(rename = "type")]
    pub kind: SignalKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,

    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    #[serde(rename = "isSecure", default)]
    pub is_secure: bool,
}

impl SignalData {
    pub fn offer(sdp: String, secure: bool) -> Self {
        Self {
            kind: SignalKind::Offer,
            sdp: Some(sdp),
            candidate: None,
            sdp_mid: None,
            sdp_mline_index: None,
            is_secure: secure,
        }
    }

    pub fn answer(sdp: String, secure: bool) -> Self {
        Self {
            kind: SignalKind::Answer,
            sdp: Some(sdp),
            candidate: None,
            sdp_mid: None,
            sdp_mline_index: None,
            is_secure: secure,
        }
    }

    pub fn candidate(init: &CandidateInit, secure: bool) -> Self {
        Self {
            kind: SignalKind::Candidate,
            sdp: None,
            candidate: Some(init.candidate.clone()),
            sdp_mid: init.sdp_mid.clone(),
            sdp_mline_index: init.sdp_mline_index,
            is_secure: secure,
        }
    }

    /// view a candidate signal as the engine-facing type
    pub fn to_candidate(&self) -> Option<CandidateInit> {
        let candidate = self.candidate.clone()?;
        Some(CandidateInit {
            candidate,
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_mline_index,
        })
    }
}

/// Relay wire envelope, one JSON object per text frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// join as host; the relay assigns a room id
    Host {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// join an existing room as client
    Client {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// relay assigned the host its room
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// relay accepted the client into the room
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    PeerJoined {
        #[serde(rename = "roomId", default)]
        room_id: String,
    },

    PeerLeft {
        #[serde(rename = "roomId", default)]
        room_id: String,
    },

    Signal {
        #[serde(rename = "roomId", default)]
        room_id: String,
        signal: SignalData,
    },

    Error {
        #[serde(rename = "roomId", default)]
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_host_join() {
        let msg = RelayMessage::Host {
            room_id: String::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"host","roomId":""}"#);
    }

    #[test]
    fn serialize_client_join() {
        let msg = RelayMessage::Client {
            room_id: "R1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"client","roomId":"R1"}"#);
    }

    #[test]
    fn parse_room_created() {
        let msg: RelayMessage =
            serde_json::from_str(r#"{"type":"room-created","roomId":"R1"}"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::RoomCreated {
                room_id: "R1".to_string()
            }
        );
    }

    #[test]
    fn parse_peer_joined() {
        let msg: RelayMessage =
            serde_json::from_str(r#"{"type":"peer-joined","roomId":"R1"}"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::PeerJoined {
                room_id: "R1".to_string()
            }
        );
    }

    #[test]
    fn parse_signal_offer() {
        let json = r#"{"type":"signal","roomId":"R1","signal":{"type":"offer","sdp":"v=0","isSecure":true}}"#;
        let msg: RelayMessage = serde_json::from_str(json).unwrap();
        let RelayMessage::Signal { room_id, signal } = msg else {
            panic!("expected signal envelope");
        };
        assert_eq!(room_id, "R1");
        assert_eq!(signal.kind, SignalKind::Offer);
        assert_eq!(signal.sdp.as_deref(), Some("v=0"));
        assert!(signal.is_secure);
        assert_eq!(signal.sdp_mline_index, None);
    }

    #[test]
    fn parse_candidate_line_index_zero_is_not_absent() {
        let json = r#"{"type":"signal","roomId":"R1","signal":{"type":"candidate","candidate":"c0","sdpMid":"0","sdpMLineIndex":0,"isSecure":false}}"#;
        let msg: RelayMessage = serde_json::from_str(json).unwrap();
        let RelayMessage::Signal { signal, .. } = msg else {
            panic!("expected signal envelope");
        };
        assert_eq!(signal.sdp_mline_index, Some(0));
        let init = signal.to_candidate().unwrap();
        assert_eq!(init.candidate, "c0");
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(init.sdp_mline_index, Some(0));
    }

    #[test]
    fn candidate_without_line_index_serializes_without_field() {
        let init = CandidateInit {
            candidate: "c1".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        let data = SignalData::candidate(&init, false);
        let json = serde_json::to_string(&data).unwrap();
        assert!(!json.contains("sdpMLineIndex"));
        assert!(!json.contains("sdpMid"));
    }

    #[test]
    fn to_candidate_requires_candidate_field() {
        let data = SignalData::offer("v=0".to_string(), false);
        assert!(data.to_candidate().is_none());
    }

    #[test]
    fn parse_error_envelope() {
        let msg: RelayMessage =
            serde_json::from_str(r#"{"type":"error","roomId":"","message":"room full"}"#).unwrap();
        let RelayMessage::Error { message, .. } = msg else {
            panic!("expected error envelope");
        };
        assert_eq!(message.as_deref(), Some("room full"));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(serde_json::from_str::<RelayMessage>(r#"{"type":"teleport","roomId":"R1"}"#).is_err());
    }

    #[test]
    fn offer_round_trip() {
        let msg = RelayMessage::Signal {
            room_id: "R1".to_string(),
            signal: SignalData::offer("v=0".to_string(), true),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: RelayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
