use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::participant::{ClientSender, Participant};
use super::room::Room;
use crate::config::RecordingConfig;
use crate::error::{GroupCallError, Result};
use crate::media::{MediaEngine, ReleaseTask};

/// Point-in-time view of one room, served by the rooms endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub room: String,
    pub participants: Vec<String>,
}

/// Maps room names to live rooms. Rooms are created on first join and
/// removed once the last participant leaves.
pub struct RoomManager {
    engine: Arc<dyn MediaEngine>,
    recording: RecordingConfig,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomManager {
    pub fn new(engine: Arc<dyn MediaEngine>, recording: RecordingConfig) -> Self {
        Self {
            engine,
            recording,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the room called `name`, creating it if needed
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<Room>> {
        if let Some(room) = self.rooms.read().await.get(name) {
            return Ok(Arc::clone(room));
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            return Ok(Arc::clone(room));
        }

        tracing::debug!(room = %name, "Room not existent. Will create now!");
        let room = Arc::new(Room::create(name, &self.engine, self.recording.clone()).await?);
        rooms.insert(name.to_string(), Arc::clone(&room));
        Ok(room)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    pub async fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn snapshot(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(RoomSummary {
                room: room.name().to_string(),
                participants: room.participant_names().await,
            });
        }
        summaries.sort_by(|a, b| a.room.cmp(&b.room));
        summaries
    }

    /// Joins `user_name` to `room_name`, creating the room on demand.
    ///
    /// A join that lands on a room being torn down evicts that room and is
    /// retried against a fresh one.
    pub async fn join(
        &self,
        room_name: &str,
        user_name: &str,
        sender: ClientSender,
        sdp_offer: &str,
    ) -> Result<(Arc<Room>, Arc<Participant>)> {
        loop {
            let room = self.get_or_create(room_name).await?;
            match room.join(user_name, sender.clone(), sdp_offer).await {
                Ok(participant) => return Ok((room, participant)),
                Err(GroupCallError::RoomClosed(_)) => {
                    tracing::debug!(room = %room_name, participant = %user_name, "Room closed during join, retrying");
                    self.evict(&room).await;
                }
                Err(e) => {
                    // A room created just for this join must not linger
                    drop(self.remove_if_empty(&room).await);
                    return Err(e);
                }
            }
        }
    }

    /// Removes `participant` from `room`, and the room from the registry if
    /// that left it empty.
    pub async fn leave(&self, room: &Arc<Room>, participant: &Participant) -> Vec<ReleaseTask> {
        let tasks = room.leave(participant).await;
        tracing::info!(room = %room.name(), participant = %participant.name(), "Participant left");

        if self.unregister_if_empty(room).await {
            vec![room.close_after(tasks).await]
        } else {
            tasks
        }
    }

    /// Seals, unregisters and closes `room` if nobody is in it. Returns the
    /// pipeline release task when the room was removed.
    pub async fn remove_if_empty(&self, room: &Arc<Room>) -> Option<ReleaseTask> {
        if self.unregister_if_empty(room).await {
            Some(room.close().await)
        } else {
            None
        }
    }

    async fn unregister_if_empty(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write().await;
        let registered = rooms
            .get(room.name())
            .map_or(false, |current| Arc::ptr_eq(current, room));
        if !registered || !room.seal_if_empty().await {
            return false;
        }
        rooms.remove(room.name());
        tracing::info!(room = %room.name(), "Removing room");
        true
    }

    /// Forgets `room` if it is still the registered room of its name
    async fn evict(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        let registered = rooms
            .get(room.name())
            .map_or(false, |current| Arc::ptr_eq(current, room));
        if registered {
            rooms.remove(room.name());
        }
    }

    /// Closes every room and waits for their media to be released
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.write().await.drain().map(|(_, r)| r).collect();
        tracing::info!(rooms = rooms.len(), "Shutting down rooms");

        let mut tasks = Vec::with_capacity(rooms.len());
        for room in &rooms {
            tasks.push(room.close().await);
        }

        for (room, task) in rooms.iter().zip(futures::future::join_all(tasks).await) {
            match task {
                Ok(Ok(())) => tracing::debug!(room = %room.name(), "Room released"),
                Ok(Err(e)) => tracing::warn!(room = %room.name(), error = %e, "Room release failed"),
                Err(e) => tracing::error!(room = %room.name(), error = %e, "Room release task panicked"),
            }
        }
    }
}
