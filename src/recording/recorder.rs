use super::state::RecordingState;
use crate::config::RecordingConfig;
use crate::error::Result;
use crate::media::{CompositeHandle, HubPortHandle, PipelineHandle, RecorderHandle, ReleaseTask};

/// Recording branch of a room: a hub port on the room composite feeding a
/// recorder endpoint.
pub struct RoomRecorder {
    room: String,
    uri: String,
    hub_port: HubPortHandle,
    recorder: RecorderHandle,
    state: RecordingState,
}

impl RoomRecorder {
    /// Creates the branch, wires it to the composite and starts recording
    pub async fn start(
        room: &str,
        pipeline: &PipelineHandle,
        composite: &CompositeHandle,
        config: &RecordingConfig,
    ) -> Result<Self> {
        let uri = super::recording_uri(config, room);
        let hub_port = composite.create_hub_port().await?;

        let recorder = match pipeline.create_recorder(&uri, config.profile).await {
            Ok(recorder) => recorder,
            Err(e) => {
                drop(hub_port.release_then(|_| {}));
                return Err(e);
            }
        };

        let mut this = Self {
            room: room.to_string(),
            uri,
            hub_port,
            recorder,
            state: RecordingState::Idle,
        };

        if let Err(e) = this.wire_and_record().await {
            drop(this.release());
            return Err(e);
        }

        this.state = RecordingState::Recording;
        tracing::info!(room = %this.room, uri = %this.uri, "Started recording");
        Ok(this)
    }

    async fn wire_and_record(&self) -> Result<()> {
        self.hub_port.connect(&self.recorder).await?;
        self.recorder.connect(&self.hub_port).await?;
        self.recorder.record().await
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    /// Stops the recorder, then releases the recorder and its hub port
    pub async fn stop_and_release(mut self) -> Vec<ReleaseTask> {
        match self.recorder.stop().await {
            Ok(()) => {
                self.state = RecordingState::Stopped;
                tracing::info!(room = %self.room, uri = %self.uri, "Stopped recording");
            }
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Could not stop recorder");
                self.state = RecordingState::Error(e.to_string());
            }
        }
        self.release()
    }

    fn release(&self) -> Vec<ReleaseTask> {
        let room = self.room.clone();
        let recorder_task = self.recorder.release_then(move |result| match result {
            Ok(()) => tracing::trace!(room = %room, "Released recorder"),
            Err(e) => tracing::warn!(room = %room, error = %e, "Could not release recorder"),
        });

        let room = self.room.clone();
        let port_task = self.hub_port.release_then(move |result| match result {
            Ok(()) => tracing::trace!(room = %room, "Released recorder hub port"),
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "Could not release recorder hub port")
            }
        });

        vec![recorder_task, port_task]
    }
}
