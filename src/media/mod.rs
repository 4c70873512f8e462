//! Boundary to the external media server.
//!
//! Rooms and participants never talk to the engine directly; they hold typed
//! handles (`PipelineHandle`, `EndpointHandle`, ...) that carry the object id
//! together with the engine that owns it. Releases are detached: they run on
//! their own task and report through a completion callback plus the returned
//! `ReleaseTask`, so callers never block on them.

mod kurento;
mod memory;
pub mod sdp;

pub use kurento::KurentoClient;
pub use memory::InMemoryMediaEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::recording::MediaProfile;

/// Completion of a detached release. Dropping it does not cancel the release.
pub type ReleaseTask = JoinHandle<Result<()>>;

/// Identifier assigned by the media engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaObjectId(String);

impl MediaObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaObjectKind {
    MediaPipeline,
    Composite,
    HubPort,
    WebRtcEndpoint,
    RecorderEndpoint,
}

impl MediaObjectKind {
    /// Type name understood by the media server
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MediaPipeline => "MediaPipeline",
            Self::Composite => "Composite",
            Self::HubPort => "HubPort",
            Self::WebRtcEndpoint => "WebRtcEndpoint",
            Self::RecorderEndpoint => "RecorderEndpoint",
        }
    }
}

impl fmt::Display for MediaObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the signaling plane needs from a media server
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn create_pipeline(&self, room_name: &str) -> Result<MediaObjectId>;

    async fn create_composite(&self, pipeline: &MediaObjectId) -> Result<MediaObjectId>;

    async fn create_hub_port(&self, composite: &MediaObjectId) -> Result<MediaObjectId>;

    async fn create_endpoint(&self, pipeline: &MediaObjectId) -> Result<MediaObjectId>;

    async fn create_recorder(
        &self,
        pipeline: &MediaObjectId,
        uri: &str,
        profile: MediaProfile,
    ) -> Result<MediaObjectId>;

    /// Returns the SDP answer for an endpoint
    async fn process_offer(&self, endpoint: &MediaObjectId, sdp_offer: &str) -> Result<String>;

    /// Directional: media flows from `source` into `sink`
    async fn connect(&self, source: &MediaObjectId, sink: &MediaObjectId) -> Result<()>;

    async fn record(&self, recorder: &MediaObjectId) -> Result<()>;

    async fn stop(&self, recorder: &MediaObjectId) -> Result<()>;

    async fn release(&self, object: &MediaObjectId) -> Result<()>;
}

/// An engine-managed object plus the engine it lives in
#[derive(Clone)]
pub struct MediaObject {
    id: MediaObjectId,
    kind: MediaObjectKind,
    engine: Arc<dyn MediaEngine>,
}

impl MediaObject {
    fn new(id: MediaObjectId, kind: MediaObjectKind, engine: Arc<dyn MediaEngine>) -> Self {
        Self { id, kind, engine }
    }

    pub fn id(&self) -> &MediaObjectId {
        &self.id
    }

    pub fn kind(&self) -> MediaObjectKind {
        self.kind
    }

    /// Sends this object's media into `sink`
    pub async fn connect(&self, sink: &MediaObject) -> Result<()> {
        self.engine.connect(&self.id, &sink.id).await
    }

    /// Starts releasing the object and returns immediately.
    ///
    /// `on_complete` runs on the release task with the engine's answer.
    pub fn release_then<F>(&self, on_complete: F) -> ReleaseTask
    where
        F: FnOnce(&Result<()>) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let id = self.id.clone();
        tokio::spawn(async move {
            let result = engine.release(&id).await;
            on_complete(&result);
            result
        })
    }
}

impl fmt::Debug for MediaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaObject")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for MediaObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaObject {}

macro_rules! media_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(MediaObject);

        impl Deref for $name {
            type Target = MediaObject;

            fn deref(&self) -> &MediaObject {
                &self.0
            }
        }
    };
}

media_handle!(
    /// Root of every media object a room allocates
    PipelineHandle
);
media_handle!(
    /// Shared mixer combining the streams of a room
    CompositeHandle
);
media_handle!(
    /// Attachment point on a composite
    HubPortHandle
);
media_handle!(
    /// WebRTC termination point, either a participant's outgoing media or
    /// the receiving side for one peer
    EndpointHandle
);
media_handle!(RecorderHandle);

impl PipelineHandle {
    pub async fn create(engine: &Arc<dyn MediaEngine>, room_name: &str) -> Result<Self> {
        let id = engine.create_pipeline(room_name).await?;
        Ok(Self(MediaObject::new(
            id,
            MediaObjectKind::MediaPipeline,
            Arc::clone(engine),
        )))
    }

    pub async fn create_composite(&self) -> Result<CompositeHandle> {
        let id = self.engine.create_composite(&self.id).await?;
        Ok(CompositeHandle(self.child(id, MediaObjectKind::Composite)))
    }

    pub async fn create_endpoint(&self) -> Result<EndpointHandle> {
        let id = self.engine.create_endpoint(&self.id).await?;
        Ok(EndpointHandle(self.child(id, MediaObjectKind::WebRtcEndpoint)))
    }

    pub async fn create_recorder(&self, uri: &str, profile: MediaProfile) -> Result<RecorderHandle> {
        let id = self.engine.create_recorder(&self.id, uri, profile).await?;
        Ok(RecorderHandle(self.child(id, MediaObjectKind::RecorderEndpoint)))
    }

    fn child(&self, id: MediaObjectId, kind: MediaObjectKind) -> MediaObject {
        MediaObject::new(id, kind, Arc::clone(&self.engine))
    }
}

impl CompositeHandle {
    pub async fn create_hub_port(&self) -> Result<HubPortHandle> {
        let id = self.engine.create_hub_port(&self.id).await?;
        Ok(HubPortHandle(MediaObject::new(
            id,
            MediaObjectKind::HubPort,
            Arc::clone(&self.engine),
        )))
    }
}

impl EndpointHandle {
    /// Runs the offer/answer exchange. Offers that do not parse never reach
    /// the engine.
    pub async fn process_offer(&self, sdp_offer: &str) -> Result<String> {
        sdp::validate_offer(sdp_offer)?;
        self.engine.process_offer(&self.id, sdp_offer).await
    }
}

impl RecorderHandle {
    pub async fn record(&self) -> Result<()> {
        self.engine.record(&self.id).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.engine.stop(&self.id).await
    }
}
