use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::participant::{ClientSender, Participant, ParticipantKey};
use super::signaling::ServerMessage;
use crate::config::RecordingConfig;
use crate::error::{GroupCallError, Result};
use crate::media::{CompositeHandle, MediaEngine, PipelineHandle, ReleaseTask};
use crate::recording::{RecordingState, RoomRecorder};

#[derive(Default)]
struct Membership {
    participants: HashMap<String, Arc<Participant>>,
    closed: bool,
}

/// A named call: its participants plus the pipeline, composite and
/// recorder they share.
pub struct Room {
    name: String,
    pipeline: PipelineHandle,
    composite: CompositeHandle,
    recording: RecordingConfig,
    recorder: Mutex<Option<RoomRecorder>>,
    membership: RwLock<Membership>,
}

impl Room {
    /// Allocates the room pipeline and its composite
    pub async fn create(
        name: &str,
        engine: &Arc<dyn MediaEngine>,
        recording: RecordingConfig,
    ) -> Result<Self> {
        let pipeline = PipelineHandle::create(engine, name).await?;
        let composite = match pipeline.create_composite().await {
            Ok(composite) => composite,
            Err(e) => {
                drop(pipeline.release_then(|_| {}));
                return Err(e);
            }
        };

        tracing::info!(room = %name, "Room created");
        Ok(Self {
            name: name.to_string(),
            pipeline,
            composite,
            recording,
            recorder: Mutex::new(None),
            membership: RwLock::new(Membership::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admits `user_name`.
    ///
    /// Everything that can fail (endpoint allocation, SDP negotiation)
    /// happens before the participant is registered, so a failed join leaves
    /// membership untouched. Once registered the room recording is started if
    /// needed, the joiner gets its SDP answer, the earlier members hear about
    /// it, and finally the joiner receives the list of everyone else.
    pub async fn join(
        &self,
        user_name: &str,
        sender: ClientSender,
        sdp_offer: &str,
    ) -> Result<Arc<Participant>> {
        tracing::info!(room = %self.name, participant = %user_name, "Adding participant");

        {
            let membership = self.membership.read().await;
            if membership.closed {
                return Err(GroupCallError::RoomClosed(self.name.clone()));
            }
            if membership.participants.contains_key(user_name) {
                return Err(self.duplicate(user_name));
            }
        }

        let participant = Arc::new(
            Participant::new(user_name, &self.name, sender, &self.pipeline, &self.composite).await?,
        );

        let sdp_answer = match participant.process_offer(sdp_offer).await {
            Ok(answer) => answer,
            Err(e) => {
                drop(participant.close().await);
                return Err(e);
            }
        };

        {
            let mut membership = self.membership.write().await;
            let rejection = if membership.closed {
                Some(GroupCallError::RoomClosed(self.name.clone()))
            } else if membership.participants.contains_key(user_name) {
                Some(self.duplicate(user_name))
            } else {
                None
            };

            if let Some(e) = rejection {
                drop(membership);
                drop(participant.close().await);
                return Err(e);
            }

            membership
                .participants
                .insert(user_name.to_string(), Arc::clone(&participant));
        }

        self.ensure_recording().await;

        if let Err(e) = participant.send_message(&ServerMessage::AnswerSdp {
            answer_sdp: sdp_answer,
        }) {
            tracing::warn!(room = %self.name, participant = %user_name, error = %e, "Could not deliver SDP answer");
        }

        self.broadcast(
            &ServerMessage::NewParticipantArrived {
                name: user_name.to_string(),
            },
            Some(participant.key()),
        )
        .await;

        self.send_participant_names(&participant).await;

        tracing::info!(room = %self.name, participant = %user_name, "Participant joined");
        Ok(participant)
    }

    fn duplicate(&self, user_name: &str) -> GroupCallError {
        GroupCallError::DuplicateParticipant {
            room: self.name.clone(),
            name: user_name.to_string(),
        }
    }

    /// Starts the room recording the first time anyone joins. Holding the
    /// recorder lock across creation keeps concurrent first joins from
    /// starting two recorders, and `close` takes the same lock after
    /// marking the room closed, so no recorder starts once it has run.
    async fn ensure_recording(&self) {
        if !self.recording.enabled {
            return;
        }

        let mut recorder = self.recorder.lock().await;
        if recorder.is_some() || self.membership.read().await.closed {
            return;
        }

        tracing::info!(room = %self.name, "Start recording");
        match RoomRecorder::start(&self.name, &self.pipeline, &self.composite, &self.recording).await {
            Ok(started) => *recorder = Some(started),
            Err(e) => {
                // Recording is not worth failing the call for
                tracing::error!(room = %self.name, error = %e, "Could not start recording");
            }
        }
    }

    /// Removes `participant`, tells the others, then releases its endpoints.
    ///
    /// The shared pipeline is left alone here; it is released by `close`
    /// once the registry sees the room empty.
    pub async fn leave(&self, participant: &Participant) -> Vec<ReleaseTask> {
        tracing::debug!(room = %self.name, participant = %participant.name(), "Participant leaving");

        let removed = {
            let mut membership = self.membership.write().await;
            let is_member = membership
                .participants
                .get(participant.name())
                .map_or(false, |current| std::ptr::eq(current.as_ref(), participant));
            if is_member {
                membership.participants.remove(participant.name())
            } else {
                None
            }
        };

        if removed.is_some() {
            self.broadcast(
                &ServerMessage::ParticipantLeft {
                    name: participant.name().to_string(),
                },
                Some(participant.key()),
            )
            .await;
        } else {
            tracing::debug!(room = %self.name, participant = %participant.name(), "Participant was not a member");
        }

        participant.close().await
    }

    /// Sends `message` to a snapshot of the membership, skipping `exclude`.
    /// Returns the names that could not be reached.
    pub async fn broadcast(
        &self,
        message: &ServerMessage,
        exclude: Option<&ParticipantKey>,
    ) -> Vec<String> {
        let recipients = self.participants().await;

        let mut unnotified = Vec::new();
        for participant in recipients {
            if Some(participant.key()) == exclude {
                continue;
            }
            if let Err(e) = participant.send_message(message) {
                tracing::debug!(
                    room = %self.name,
                    participant = %participant.name(),
                    error = %e,
                    "Participant could not be notified"
                );
                unnotified.push(participant.name().to_string());
            }
        }

        if !unnotified.is_empty() {
            tracing::warn!(
                room = %self.name,
                unnotified = ?unnotified,
                "Some participants could not be notified"
            );
        }
        unnotified
    }

    async fn send_participant_names(&self, participant: &Participant) {
        let names: Vec<String> = self
            .participants()
            .await
            .iter()
            .filter(|other| other.key() != participant.key())
            .map(|other| other.name().to_string())
            .collect();

        tracing::debug!(
            room = %self.name,
            participant = %participant.name(),
            count = names.len(),
            "Sending list of participants"
        );

        if let Err(e) = participant.send_message(&ServerMessage::ExistingParticipants { data: names }) {
            tracing::warn!(room = %self.name, participant = %participant.name(), error = %e, "Could not send participant list");
        }
    }

    /// Snapshot of the current members
    pub async fn participants(&self) -> Vec<Arc<Participant>> {
        self.membership
            .read()
            .await
            .participants
            .values()
            .cloned()
            .collect()
    }

    pub async fn participant_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .membership
            .read()
            .await
            .participants
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub async fn participant(&self, name: &str) -> Option<Arc<Participant>> {
        self.membership.read().await.participants.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.membership.read().await.participants.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.membership.read().await.closed
    }

    pub async fn recording_state(&self) -> Option<RecordingState> {
        self.recorder.lock().await.as_ref().map(|r| r.state().clone())
    }

    /// Marks an empty room closed so no join can slip in afterwards.
    /// Returns false, and changes nothing, if anyone is still inside.
    pub(super) async fn seal_if_empty(&self) -> bool {
        let mut membership = self.membership.write().await;
        if membership.participants.is_empty() {
            membership.closed = true;
            true
        } else {
            false
        }
    }

    /// Tears the room down: recorder, every remaining participant, then the
    /// pipeline. Only the recorder stop is awaited. The returned task
    /// finishes once the pipeline release does, which starts only after the
    /// objects living in it were released.
    pub async fn close(&self) -> ReleaseTask {
        self.close_after(Vec::new()).await
    }

    /// Like `close`, but the pipeline also waits for `pending` releases of
    /// objects created in it.
    pub(super) async fn close_after(&self, pending: Vec<ReleaseTask>) -> ReleaseTask {
        let remaining: Vec<Arc<Participant>> = {
            let mut membership = self.membership.write().await;
            membership.closed = true;
            membership.participants.drain().map(|(_, p)| p).collect()
        };

        let mut dependents = pending;

        if let Some(recorder) = self.recorder.lock().await.take() {
            dependents.extend(recorder.stop_and_release().await);
        }

        for participant in remaining {
            dependents.extend(participant.close().await);
        }

        let room = self.name.clone();
        let pipeline = self.pipeline.clone();
        tracing::debug!(room = %self.name, "Room closed");

        tokio::spawn(async move {
            let _ = futures::future::join_all(dependents).await;
            let release = pipeline.release_then(move |result| match result {
                Ok(()) => tracing::trace!(room = %room, "Released pipeline"),
                Err(e) => tracing::warn!(room = %room, error = %e, "Could not release pipeline"),
            });
            match release.await {
                Ok(result) => result,
                Err(e) => Err(GroupCallError::internal(format!("pipeline release task: {}", e))),
            }
        })
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("pipeline", self.pipeline.id())
            .finish()
    }
}
