use tracing::{info, warn};

use crate::signaling::RelayMessage;

/// Which side of the pairing we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Room identity for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub role: Role,
}

/// What the supervisor should do with an inbound room message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoomEvent {
    /// relay assigned us a room id
    Assigned,
    /// we are in the requested room
    Joined,
    /// a peer arrived and we are host: kick off negotiation
    StartNegotiation,
    /// a peer arrived and we are client: their offer will follow
    PeerJoined,
    PeerLeft,
}

/// Pure room-identity logic: no network, no timers. The supervisor feeds it
/// inbound messages and acts on the events it hands back.
#[derive(Debug)]
pub(crate) struct RoomCoordinator {
    room: Room,
    locked: bool,
}

impl RoomCoordinator {
    pub fn new(role: Role, room_id: String) -> Self {
        Self {
            room: Room { id: room_id, role },
            locked: false,
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn role(&self) -> Role {
        self.room.role
    }

    /// room identity may not change once negotiation starts
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// the message that enters us into a room
    pub fn join_message(&self) -> RelayMessage {
        match self.room.role {
            Role::Host => RelayMessage::Host {
                room_id: String::new(),
            },
            Role::Client => RelayMessage::Client {
                room_id: self.room.id.clone(),
            },
        }
    }

    pub fn handle(&mut self, message: &RelayMessage) -> Option<RoomEvent> {
        match message {
            RelayMessage::RoomCreated { room_id } => {
                if self.locked {
                    if *room_id != self.room.id {
                        warn!("ignoring room id change to {} after negotiation start", room_id);
                    }
                    return None;
                }
                self.room.id = room_id.clone();
                info!("room assigned: {}", room_id);
                Some(RoomEvent::Assigned)
            }

            RelayMessage::RoomJoined { room_id } => {
                if !self.locked && self.room.id.is_empty() {
                    self.room.id = room_id.clone();
                }
                info!("joined room: {}", self.room.id);
                Some(RoomEvent::Joined)
            }

            RelayMessage::PeerJoined { .. } => Some(match self.room.role {
                Role::Host => RoomEvent::StartNegotiation,
                Role::Client => RoomEvent::PeerJoined,
            }),

            RelayMessage::PeerLeft { .. } => Some(RoomEvent::PeerLeft),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_joins_with_empty_room_id() {
        let coordinator = RoomCoordinator::new(Role::Host, String::new());
        assert_eq!(
            coordinator.join_message(),
            RelayMessage::Host {
                room_id: String::new()
            }
        );
    }

    #[test]
    fn client_joins_with_requested_room_id() {
        let coordinator = RoomCoordinator::new(Role::Client, "R1".to_string());
        assert_eq!(
            coordinator.join_message(),
            RelayMessage::Client {
                room_id: "R1".to_string()
            }
        );
    }

    #[test]
    fn room_created_stores_assigned_id() {
        let mut coordinator = RoomCoordinator::new(Role::Host, String::new());
        let event = coordinator.handle(&RelayMessage::RoomCreated {
            room_id: "R1".to_string(),
        });
        assert_eq!(event, Some(RoomEvent::Assigned));
        assert_eq!(coordinator.room().id, "R1");
    }

    #[test]
    fn peer_joined_starts_negotiation_for_host() {
        let mut coordinator = RoomCoordinator::new(Role::Host, String::new());
        coordinator.handle(&RelayMessage::RoomCreated {
            room_id: "R1".to_string(),
        });
        let event = coordinator.handle(&RelayMessage::PeerJoined {
            room_id: "R1".to_string(),
        });
        assert_eq!(event, Some(RoomEvent::StartNegotiation));
    }

    #[test]
    fn peer_joined_is_informational_for_client() {
        let mut coordinator = RoomCoordinator::new(Role::Client, "R1".to_string());
        let event = coordinator.handle(&RelayMessage::PeerJoined {
            room_id: "R1".to_string(),
        });
        assert_eq!(event, Some(RoomEvent::PeerJoined));
    }

    #[test]
    fn room_id_is_immutable_once_locked() {
        let mut coordinator = RoomCoordinator::new(Role::Host, String::new());
        coordinator.handle(&RelayMessage::RoomCreated {
            room_id: "R1".to_string(),
        });
        coordinator.lock();
        let event = coordinator.handle(&RelayMessage::RoomCreated {
            room_id: "R2".to_string(),
        });
        assert_eq!(event, None);
        assert_eq!(coordinator.room().id, "R1");
    }

    #[test]
    fn signal_messages_are_not_room_events() {
        let mut coordinator = RoomCoordinator::new(Role::Host, String::new());
        let event = coordinator.handle(&RelayMessage::Error {
            room_id: String::new(),
            message: Some("room full".to_string()),
        });
        assert_eq!(event, None);
    }
}
