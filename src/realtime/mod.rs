use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::models::{Match, Tournament, TournamentParticipant};

/// The WebSocket endpoint that feeds connections into the hub.
pub mod socket;

/// Events pushed from the server to connected browsers.
///
/// They are refresh hints only: clients re-fetch authoritative state over REST.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    TournamentCreated(Tournament),
    TournamentUpdated(Tournament),
    ParticipantJoined(TournamentParticipant),
    MatchUpdated(Match),
    #[serde(rename_all = "camelCase")]
    JoinedRoom { tournament_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LeftRoom { tournament_id: Uuid },
    Pong,
    Error { message: String },
}

/// Messages a browser may send over its socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinTournamentRoom { tournament_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LeaveTournamentRoom { tournament_id: Uuid },
    Ping,
}

/// Handle used to push serialized events to one connected browser.
#[derive(Debug)]
struct Connection {
    tx: mpsc::UnboundedSender<String>,
    rooms: HashSet<Uuid>,
}

/// Process-wide registry of open WebSocket connections.
///
/// Delivery is best effort: no replay for clients that were offline, no acknowledgement, and
/// ordering only per connection. The registry is local to this process.
#[derive(Debug, Default)]
pub struct Hub {
    connections: DashMap<Uuid, Connection>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its id along with the receiving end of its queue.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!("Registered socket {}", id);
        (id, rx)
    }

    pub fn unregister(&self, connection_id: Uuid) {
        if self.connections.remove(&connection_id).is_some() {
            debug!("Unregistered socket {}", connection_id);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns false if the connection is unknown.
    pub fn join_room(&self, connection_id: Uuid, tournament_id: Uuid) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(mut connection) => {
                connection.rooms.insert(tournament_id);
                true
            }
            None => false,
        }
    }

    pub fn leave_room(&self, connection_id: Uuid, tournament_id: Uuid) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(mut connection) => connection.rooms.remove(&tournament_id),
            None => false,
        }
    }

    /// Sends an event to every open connection. Returns how many received it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.fan_out(event, None)
    }

    /// Sends an event to the connections that joined the tournament's room.
    pub fn broadcast_to_room(&self, tournament_id: Uuid, event: &ServerEvent) -> usize {
        self.fan_out(event, Some(tournament_id))
    }

    /// Sends an event to a single connection.
    pub fn send_to(&self, connection_id: Uuid, event: &ServerEvent) -> bool {
        let Some(payload) = serialize(event) else {
            return false;
        };
        let delivered = match self.connections.get(&connection_id) {
            Some(connection) => connection.tx.send(payload).is_ok(),
            None => return false,
        };
        if !delivered {
            self.unregister(connection_id);
        }
        delivered
    }

    /// Connections whose queue is closed are dropped from the registry on the way.
    fn fan_out(&self, event: &ServerEvent, room: Option<Uuid>) -> usize {
        let Some(payload) = serialize(event) else {
            return 0;
        };

        let mut delivered = 0;
        self.connections.retain(|id, connection| {
            if let Some(room) = room {
                if !connection.rooms.contains(&room) {
                    return true;
                }
            }
            match connection.tx.send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!("Dropping closed socket {}", id);
                    false
                }
            }
        });
        delivered
    }

    /// Applies a client message and returns the reply to send back, if any.
    pub fn handle_client_message(&self, connection_id: Uuid, text: &str) -> Option<ServerEvent> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Unreadable message on socket {}: {}", connection_id, e);
                return Some(ServerEvent::Error {
                    message: "Unrecognized message".to_string(),
                });
            }
        };

        match message {
            ClientMessage::JoinTournamentRoom { tournament_id } => {
                self.join_room(connection_id, tournament_id);
                Some(ServerEvent::JoinedRoom { tournament_id })
            }
            ClientMessage::LeaveTournamentRoom { tournament_id } => {
                self.leave_room(connection_id, tournament_id);
                Some(ServerEvent::LeftRoom { tournament_id })
            }
            ClientMessage::Ping => Some(ServerEvent::Pong),
        }
    }
}

fn serialize(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Could not serialize realtime event: {}", e);
            None
        }
    }
}
