use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::Message;

use super::participant::Participant;
use super::registry::RoomManager;
use super::room::Room;
use crate::error::{GroupCallError, Result};

/// Messages sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ClientMessage {
    #[serde(rename = "joinRoom")]
    JoinRoom {
        #[serde(alias = "userName")]
        name: String,
        #[serde(alias = "roomName")]
        room: String,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    #[serde(rename = "leaveRoom")]
    LeaveRoom,
}

/// Messages sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ServerMessage {
    #[serde(rename = "answer_sdp")]
    AnswerSdp { answer_sdp: String },

    #[serde(rename = "existingParticipants")]
    ExistingParticipants { data: Vec<String> },

    #[serde(rename = "newParticipantArrived")]
    NewParticipantArrived { name: String },

    #[serde(rename = "participantLeft")]
    ParticipantLeft { name: String },

    #[serde(rename = "joinRejected")]
    JoinRejected { message: String },
}

/// Per-connection signaling state: which room, as which participant
pub struct SignalingHandler {
    registry: Arc<RoomManager>,
    sender: mpsc::UnboundedSender<Message>,
    session: Option<(Arc<Room>, Arc<Participant>)>,
}

impl SignalingHandler {
    pub fn new(registry: Arc<RoomManager>, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            registry,
            sender,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&(Arc<Room>, Arc<Participant>)> {
        self.session.as_ref()
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::JoinRoom {
                name,
                room,
                sdp_offer,
            } => {
                if let Err(e) = self.join(&name, &room, &sdp_offer).await {
                    tracing::warn!(
                        room = %room,
                        participant = %name,
                        error = %e,
                        "Join rejected"
                    );
                    self.reply(&ServerMessage::JoinRejected {
                        message: e.to_string(),
                    });
                }
            }
            ClientMessage::LeaveRoom => {
                if let Err(e) = self.leave().await {
                    tracing::debug!(error = %e, "Ignoring leaveRoom");
                }
            }
        }
    }

    async fn join(&mut self, user_name: &str, room_name: &str, sdp_offer: &str) -> Result<()> {
        if let Some((room, _)) = &self.session {
            return Err(GroupCallError::AlreadyInRoom(room.name().to_string()));
        }

        let (room, participant) = self
            .registry
            .join(room_name, user_name, self.sender.clone(), sdp_offer)
            .await?;
        self.session = Some((room, participant));
        Ok(())
    }

    pub async fn leave(&mut self) -> Result<()> {
        let (room, participant) = self.session.take().ok_or(GroupCallError::NotInRoom)?;
        // Releases finish in the background
        drop(self.registry.leave(&room, &participant).await);
        Ok(())
    }

    /// Called when the connection goes away
    pub async fn cleanup(&mut self) {
        if let Some((room, participant)) = &self.session {
            tracing::info!(
                room = %room.name(),
                participant = %participant.name(),
                "Connection closed, leaving room"
            );
        }
        let _ = self.leave().await;
    }

    fn reply(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => {
                if self.sender.send(Message::text(text)).is_err() {
                    tracing::debug!("Client went away before reply");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::media::sdp::TEST_OFFER;
    use crate::media::{InMemoryMediaEngine, MediaEngine};
    use serde_json::json;

    fn registry() -> Arc<RoomManager> {
        let engine: Arc<dyn MediaEngine> = Arc::new(InMemoryMediaEngine::new());
        Arc::new(RoomManager::new(engine, RecordingConfig::default()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(serde_json::from_str(message.to_str().unwrap()).unwrap());
        }
        out
    }

    fn join_message(name: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            name: name.to_string(),
            room: "R1".to_string(),
            sdp_offer: TEST_OFFER.to_string(),
        }
    }

    #[test]
    fn test_client_message_parsing() {
        let parsed: ClientMessage = serde_json::from_value(json!({
            "id": "joinRoom", "name": "alice", "room": "R1", "sdpOffer": "v=0"
        }))
        .unwrap();
        assert!(matches!(parsed, ClientMessage::JoinRoom { ref name, .. } if name == "alice"));

        let aliased: ClientMessage = serde_json::from_value(json!({
            "id": "joinRoom", "userName": "bob", "roomName": "R2", "sdpOffer": "v=0"
        }))
        .unwrap();
        assert!(matches!(aliased, ClientMessage::JoinRoom { ref room, .. } if room == "R2"));

        let leave: ClientMessage = serde_json::from_value(json!({"id": "leaveRoom"})).unwrap();
        assert!(matches!(leave, ClientMessage::LeaveRoom));
    }

    #[test]
    fn test_server_message_wire_format() {
        let answer = serde_json::to_value(ServerMessage::AnswerSdp {
            answer_sdp: "v=0".to_string(),
        })
        .unwrap();
        assert_eq!(answer, json!({"id": "answer_sdp", "answer_sdp": "v=0"}));

        let existing = serde_json::to_value(ServerMessage::ExistingParticipants {
            data: vec!["alice".to_string()],
        })
        .unwrap();
        assert_eq!(existing, json!({"id": "existingParticipants", "data": ["alice"]}));

        let arrived = serde_json::to_value(ServerMessage::NewParticipantArrived {
            name: "bob".to_string(),
        })
        .unwrap();
        assert_eq!(arrived, json!({"id": "newParticipantArrived", "name": "bob"}));

        let left = serde_json::to_value(ServerMessage::ParticipantLeft {
            name: "bob".to_string(),
        })
        .unwrap();
        assert_eq!(left, json!({"id": "participantLeft", "name": "bob"}));
    }

    #[tokio::test]
    async fn test_join_then_leave() {
        let registry = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = SignalingHandler::new(registry.clone(), tx);

        handler.handle_message(join_message("alice")).await;
        assert!(handler.session().is_some());

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::AnswerSdp { .. }));
        assert_eq!(
            messages[1],
            ServerMessage::ExistingParticipants { data: vec![] }
        );

        handler.handle_message(ClientMessage::LeaveRoom).await;
        assert!(handler.session().is_none());
        assert!(registry.get("R1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_to_client() {
        let registry = registry();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let mut alice = SignalingHandler::new(registry.clone(), tx_a);
        let mut impostor = SignalingHandler::new(registry.clone(), tx_b);

        alice.handle_message(join_message("alice")).await;
        impostor.handle_message(join_message("alice")).await;

        assert!(impostor.session().is_none());
        let messages = drain(&mut rx_b);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::JoinRejected { ref message } if message.contains("already exists")));

        let room = registry.get("R1").await.unwrap();
        assert_eq!(room.participant_names().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_second_join_on_same_connection_is_rejected() {
        let registry = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = SignalingHandler::new(registry.clone(), tx);

        handler.handle_message(join_message("alice")).await;
        drain(&mut rx);
        handler.handle_message(join_message("alice-again")).await;

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::JoinRejected { .. }));
        assert_eq!(registry.get("R1").await.unwrap().len().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_notifies_remaining_participants() {
        let registry = registry();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let mut alice = SignalingHandler::new(registry.clone(), tx_a);
        let mut bob = SignalingHandler::new(registry.clone(), tx_b);

        alice.handle_message(join_message("alice")).await;
        bob.handle_message(join_message("bob")).await;
        drain(&mut rx_a);

        bob.cleanup().await;

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ParticipantLeft {
                name: "bob".to_string()
            }]
        );
        assert!(registry.get("R1").await.is_some());
    }

    #[tokio::test]
    async fn test_leave_without_join() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handler = SignalingHandler::new(registry(), tx);
        assert!(matches!(handler.leave().await, Err(GroupCallError::NotInRoom)));
    }
}
