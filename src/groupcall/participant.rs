use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};
use warp::ws::Message;

use super::signaling::ServerMessage;
use crate::error::{GroupCallError, Result};
use crate::media::{CompositeHandle, EndpointHandle, HubPortHandle, PipelineHandle, ReleaseTask};

/// Outbound half of a client's signaling connection
pub type ClientSender = mpsc::UnboundedSender<Message>;

/// Identity of a participant: the same name in another room is someone else
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantKey {
    pub name: String,
    pub room: String,
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.room)
    }
}

/// A user's media and messaging state inside one room
pub struct Participant {
    key: ParticipantKey,
    sender: ClientSender,
    pipeline: PipelineHandle,
    outgoing: EndpointHandle,
    hub_port: HubPortHandle,
    incoming: Mutex<HashMap<String, EndpointHandle>>,
    closed: AtomicBool,
}

impl Participant {
    /// Allocates the outgoing endpoint and plugs it into the room composite
    /// in both directions.
    pub async fn new(
        name: &str,
        room: &str,
        sender: ClientSender,
        pipeline: &PipelineHandle,
        composite: &CompositeHandle,
    ) -> Result<Self> {
        let outgoing = pipeline.create_endpoint().await?;

        let hub_port = match composite.create_hub_port().await {
            Ok(port) => port,
            Err(e) => {
                drop(outgoing.release_then(|_| {}));
                return Err(e);
            }
        };

        if let Err(e) = Self::link(&outgoing, &hub_port).await {
            drop(outgoing.release_then(|_| {}));
            drop(hub_port.release_then(|_| {}));
            return Err(e);
        }

        tracing::debug!(room = %room, participant = %name, endpoint = %outgoing.id(), "Participant media ready");

        Ok(Self {
            key: ParticipantKey {
                name: name.to_string(),
                room: room.to_string(),
            },
            sender,
            pipeline: pipeline.clone(),
            outgoing,
            hub_port,
            incoming: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn link(outgoing: &EndpointHandle, hub_port: &HubPortHandle) -> Result<()> {
        hub_port.connect(outgoing).await?;
        outgoing.connect(hub_port).await
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn room_name(&self) -> &str {
        &self.key.room
    }

    pub fn key(&self) -> &ParticipantKey {
        &self.key
    }

    pub fn outgoing_endpoint(&self) -> &EndpointHandle {
        &self.outgoing
    }

    /// Negotiates the participant's outgoing endpoint
    pub async fn process_offer(&self, sdp_offer: &str) -> Result<String> {
        self.outgoing.process_offer(sdp_offer).await.map_err(|e| match e {
            GroupCallError::MediaEngineTransport(_)
            | GroupCallError::InvalidSdp(_)
            | GroupCallError::Negotiation(_) => e,
            other => GroupCallError::Negotiation(other.to_string()),
        })
    }

    pub fn send_message(&self, message: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        tracing::debug!(participant = %self.key, message = %text, "Sending message");
        self.sender
            .send(Message::text(text))
            .map_err(|_| GroupCallError::Channel(self.key.name.clone()))
    }

    /// Endpoint receiving `peer`'s media, created on first use.
    ///
    /// Asking for yourself returns the outgoing endpoint (loopback).
    pub async fn get_or_create_incoming_endpoint(&self, peer: &Participant) -> Result<EndpointHandle> {
        if peer == self {
            tracing::debug!(participant = %self.key, "Configuring loopback");
            return Ok(self.outgoing.clone());
        }

        let mut incoming = self.incoming.lock().await;
        if let Some(endpoint) = incoming.get(peer.name()) {
            return Ok(endpoint.clone());
        }

        tracing::debug!(participant = %self.key, peer = %peer.name(), "Creating incoming endpoint");
        let endpoint = self.pipeline.create_endpoint().await?;
        if let Err(e) = peer.outgoing.connect(&endpoint).await {
            drop(endpoint.release_then(|_| {}));
            return Err(e);
        }
        incoming.insert(peer.name().to_string(), endpoint.clone());
        Ok(endpoint)
    }

    pub async fn incoming_peers(&self) -> Vec<String> {
        self.incoming.lock().await.keys().cloned().collect()
    }

    /// Releases every endpoint this participant owns. Each release is
    /// independent; failures are logged by the release task. Closing twice
    /// is a no-op.
    pub async fn close(&self) -> Vec<ReleaseTask> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        tracing::debug!(participant = %self.key, "Releasing resources");

        let mut tasks = Vec::new();
        for (peer, endpoint) in self.incoming.lock().await.drain() {
            let key = self.key.clone();
            tasks.push(endpoint.release_then(move |result| match result {
                Ok(()) => tracing::trace!(participant = %key, peer = %peer, "Released incoming endpoint"),
                Err(e) => tracing::warn!(
                    participant = %key,
                    peer = %peer,
                    error = %e,
                    "Could not release incoming endpoint"
                ),
            }));
        }

        let key = self.key.clone();
        tasks.push(self.outgoing.release_then(move |result| match result {
            Ok(()) => tracing::trace!(participant = %key, "Released outgoing endpoint"),
            Err(e) => tracing::warn!(participant = %key, error = %e, "Could not release outgoing endpoint"),
        }));

        let key = self.key.clone();
        tasks.push(self.hub_port.release_then(move |result| match result {
            Ok(()) => tracing::trace!(participant = %key, "Released hub port"),
            Err(e) => tracing::warn!(participant = %key, error = %e, "Could not release hub port"),
        }));

        tasks
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Participant {}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("key", &self.key)
            .field("outgoing", self.outgoing.id())
            .finish()
    }
}
