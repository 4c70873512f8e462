use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{MediaEngine, MediaObjectId, MediaObjectKind};
use crate::error::{GroupCallError, Result};
use crate::recording::{MediaProfile, RecordingState};

/// How many released objects, release requests and finished recorders are
/// remembered for inspection
const HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
struct ObjectRecord {
    kind: MediaObjectKind,
    parent: Option<MediaObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderRecord {
    pub uri: String,
    pub profile: MediaProfile,
    pub state: RecordingState,
}

#[derive(Default)]
struct EngineState {
    objects: HashMap<MediaObjectId, ObjectRecord>,
    connections: Vec<(MediaObjectId, MediaObjectId)>,
    offers: HashMap<MediaObjectId, String>,
    recorders: HashMap<MediaObjectId, RecorderRecord>,
    released: VecDeque<(MediaObjectId, MediaObjectKind)>,
    release_requests: VecDeque<MediaObjectId>,
    finished_recorders: VecDeque<RecorderRecord>,
}

fn push_bounded<T>(history: &mut VecDeque<T>, item: T) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(item);
}

impl EngineState {
    fn released_kind(&self, id: &MediaObjectId) -> Option<MediaObjectKind> {
        self.released
            .iter()
            .find(|(released, _)| released == id)
            .map(|(_, kind)| *kind)
    }

    /// Drops `id` and everything created under it from the live tables
    fn prune(&mut self, id: &MediaObjectId) {
        let mut doomed = vec![id.clone()];
        while let Some(id) = doomed.pop() {
            let Some(record) = self.objects.remove(&id) else {
                continue;
            };
            doomed.extend(
                self.objects
                    .iter()
                    .filter(|(_, o)| o.parent.as_ref() == Some(&id))
                    .map(|(child, _)| child.clone()),
            );

            self.connections.retain(|(source, sink)| *source != id && *sink != id);
            self.offers.remove(&id);
            if let Some(recorder) = self.recorders.remove(&id) {
                push_bounded(&mut self.finished_recorders, recorder);
            }
            push_bounded(&mut self.released, (id, record.kind));
        }
    }
}

/// Media engine that keeps every object in process memory.
///
/// Useful for local runs without a media server and for exercising rooms in
/// tests: it remembers object kinds, connections, releases and recorder
/// transitions, and can be told to fail specific operations. Released
/// objects leave the live tables; only a bounded history of them is kept.
#[derive(Default)]
pub struct InMemoryMediaEngine {
    state: Mutex<EngineState>,
    answers: AtomicU64,
    fail_endpoints: AtomicBool,
    fail_offers: AtomicBool,
    fail_connections: AtomicBool,
    fail_releases: AtomicBool,
}

impl InMemoryMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_endpoint_creation(&self, fail: bool) {
        self.fail_endpoints.store(fail, Ordering::SeqCst);
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connections(&self, fail: bool) {
        self.fail_connections.store(fail, Ordering::SeqCst);
    }

    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    pub async fn kind_of(&self, id: &MediaObjectId) -> Option<MediaObjectKind> {
        let state = self.state.lock().await;
        state
            .objects
            .get(id)
            .map(|o| o.kind)
            .or_else(|| state.released_kind(id))
    }

    /// True while `id` is still in the release history
    pub async fn is_released(&self, id: &MediaObjectId) -> bool {
        self.state.lock().await.released_kind(id).is_some()
    }

    /// Objects of `kind` that have not been released
    pub async fn live_count(&self, kind: MediaObjectKind) -> usize {
        self.state
            .lock()
            .await
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .count()
    }

    pub async fn is_connected(&self, source: &MediaObjectId, sink: &MediaObjectId) -> bool {
        self.state
            .lock()
            .await
            .connections
            .iter()
            .any(|(s, t)| s == source && t == sink)
    }

    /// Most recent release requests, in arrival order
    pub async fn release_requests(&self) -> Vec<MediaObjectId> {
        self.state.lock().await.release_requests.iter().cloned().collect()
    }

    pub async fn offer_count(&self) -> usize {
        self.state.lock().await.offers.len()
    }

    /// Live recorders followed by the most recently released ones
    pub async fn recorders(&self) -> Vec<RecorderRecord> {
        let state = self.state.lock().await;
        state
            .recorders
            .values()
            .chain(state.finished_recorders.iter())
            .cloned()
            .collect()
    }

    fn generate_id(kind: MediaObjectKind, parent: Option<&MediaObjectId>) -> MediaObjectId {
        let suffix: u64 = rand::thread_rng().gen();
        match parent {
            Some(parent) => MediaObjectId::new(format!(
                "{}/{:016x}_kurento.{}",
                parent.as_str().split('/').next().unwrap_or_default(),
                suffix,
                kind
            )),
            None => MediaObjectId::new(format!("{:016x}_kurento.{}", suffix, kind)),
        }
    }

    async fn insert(
        &self,
        kind: MediaObjectKind,
        parent: Option<&MediaObjectId>,
    ) -> Result<MediaObjectId> {
        let mut state = self.state.lock().await;

        if let Some(parent) = parent {
            if !state.objects.contains_key(parent) {
                return Err(GroupCallError::allocation(format!(
                    "cannot create {} under missing or released {}",
                    kind, parent
                )));
            }
        }

        let id = Self::generate_id(kind, parent);
        state.objects.insert(
            id.clone(),
            ObjectRecord {
                kind,
                parent: parent.cloned(),
            },
        );
        Ok(id)
    }

    fn require_live(state: &EngineState, id: &MediaObjectId) -> Result<MediaObjectKind> {
        match state.objects.get(id) {
            Some(record) => Ok(record.kind),
            None if state.released_kind(id).is_some() => {
                Err(GroupCallError::allocation(format!("{} was released", id)))
            }
            None => Err(GroupCallError::allocation(format!("unknown object {}", id))),
        }
    }
}

#[async_trait]
impl MediaEngine for InMemoryMediaEngine {
    async fn create_pipeline(&self, room_name: &str) -> Result<MediaObjectId> {
        let id = self.insert(MediaObjectKind::MediaPipeline, None).await?;
        tracing::debug!(room = %room_name, pipeline = %id, "In-memory pipeline created");
        Ok(id)
    }

    async fn create_composite(&self, pipeline: &MediaObjectId) -> Result<MediaObjectId> {
        self.insert(MediaObjectKind::Composite, Some(pipeline)).await
    }

    async fn create_hub_port(&self, composite: &MediaObjectId) -> Result<MediaObjectId> {
        self.insert(MediaObjectKind::HubPort, Some(composite)).await
    }

    async fn create_endpoint(&self, pipeline: &MediaObjectId) -> Result<MediaObjectId> {
        if self.fail_endpoints.load(Ordering::SeqCst) {
            return Err(GroupCallError::allocation("endpoint creation refused"));
        }
        self.insert(MediaObjectKind::WebRtcEndpoint, Some(pipeline)).await
    }

    async fn create_recorder(
        &self,
        pipeline: &MediaObjectId,
        uri: &str,
        profile: MediaProfile,
    ) -> Result<MediaObjectId> {
        let id = self
            .insert(MediaObjectKind::RecorderEndpoint, Some(pipeline))
            .await?;
        self.state.lock().await.recorders.insert(
            id.clone(),
            RecorderRecord {
                uri: uri.to_string(),
                profile,
                state: RecordingState::Idle,
            },
        );
        Ok(id)
    }

    async fn process_offer(&self, endpoint: &MediaObjectId, sdp_offer: &str) -> Result<String> {
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(GroupCallError::Negotiation("offer rejected".to_string()));
        }

        let mut state = self.state.lock().await;
        match Self::require_live(&state, endpoint) {
            Ok(MediaObjectKind::WebRtcEndpoint) => {}
            Ok(kind) => {
                return Err(GroupCallError::Negotiation(format!(
                    "{} is a {}, not an endpoint",
                    endpoint, kind
                )))
            }
            Err(e) => return Err(GroupCallError::Negotiation(e.to_string())),
        }
        state.offers.insert(endpoint.clone(), sdp_offer.to_string());

        let version = self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=in-memory\r\nt=0 0\r\n",
            version + 1,
            version
        ))
    }

    async fn connect(&self, source: &MediaObjectId, sink: &MediaObjectId) -> Result<()> {
        if self.fail_connections.load(Ordering::SeqCst) {
            return Err(GroupCallError::internal("connection refused"));
        }
        let mut state = self.state.lock().await;
        Self::require_live(&state, source)?;
        Self::require_live(&state, sink)?;
        state.connections.push((source.clone(), sink.clone()));
        Ok(())
    }

    async fn record(&self, recorder: &MediaObjectId) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::require_live(&state, recorder)?;
        let record = state
            .recorders
            .get_mut(recorder)
            .ok_or_else(|| GroupCallError::allocation(format!("{} is not a recorder", recorder)))?;
        record.state = RecordingState::Recording;
        Ok(())
    }

    async fn stop(&self, recorder: &MediaObjectId) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .recorders
            .get_mut(recorder)
            .ok_or_else(|| GroupCallError::internal(format!("{} is not a recorder", recorder)))?;
        record.state = RecordingState::Stopped;
        Ok(())
    }

    async fn release(&self, object: &MediaObjectId) -> Result<()> {
        let mut state = self.state.lock().await;
        push_bounded(&mut state.release_requests, object.clone());

        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(GroupCallError::Release(format!("release of {} refused", object)));
        }

        if !state.objects.contains_key(object) {
            return Err(match state.released_kind(object) {
                Some(_) => GroupCallError::Release(format!("{} already released", object)),
                None => GroupCallError::Release(format!("unknown object {}", object)),
            });
        }

        // Releasing a parent releases everything created under it
        state.prune(object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pipeline_release_cascades() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();
        let composite = engine.create_composite(&pipeline).await.unwrap();
        let port = engine.create_hub_port(&composite).await.unwrap();
        let endpoint = engine.create_endpoint(&pipeline).await.unwrap();

        engine.release(&pipeline).await.unwrap();

        assert!(engine.is_released(&composite).await);
        assert!(engine.is_released(&port).await);
        assert!(engine.is_released(&endpoint).await);
        assert_eq!(engine.live_count(MediaObjectKind::WebRtcEndpoint).await, 0);
    }

    #[tokio::test]
    async fn test_double_release_fails() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();
        engine.release(&pipeline).await.unwrap();

        let err = engine.release(&pipeline).await.unwrap_err();
        assert!(matches!(err, GroupCallError::Release(_)));
        assert_eq!(engine.release_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cannot_allocate_under_released_pipeline() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();
        engine.release(&pipeline).await.unwrap();

        let err = engine.create_endpoint(&pipeline).await.unwrap_err();
        assert!(matches!(err, GroupCallError::MediaAllocation(_)));
    }

    #[tokio::test]
    async fn test_recorder_lifecycle() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();
        let recorder = engine
            .create_recorder(&pipeline, "file:///tmp/R1.webm", MediaProfile::Webm)
            .await
            .unwrap();

        engine.record(&recorder).await.unwrap();
        assert_eq!(engine.recorders().await[0].state, RecordingState::Recording);

        engine.stop(&recorder).await.unwrap();
        assert_eq!(engine.recorders().await[0].state, RecordingState::Stopped);
        assert_eq!(engine.recorders().await[0].uri, "file:///tmp/R1.webm");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();

        engine.fail_endpoint_creation(true);
        assert!(engine.create_endpoint(&pipeline).await.is_err());

        engine.fail_endpoint_creation(false);
        let endpoint = engine.create_endpoint(&pipeline).await.unwrap();

        engine.fail_offers(true);
        let err = engine.process_offer(&endpoint, "v=0").await.unwrap_err();
        assert!(matches!(err, GroupCallError::Negotiation(_)));

        engine.fail_connections(true);
        assert!(engine.connect(&endpoint, &endpoint).await.is_err());
    }

    #[tokio::test]
    async fn test_child_ids_are_scoped_to_pipeline() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();
        let endpoint = engine.create_endpoint(&pipeline).await.unwrap();

        assert!(endpoint.as_str().starts_with(pipeline.as_str()));
        assert_eq!(
            engine.kind_of(&endpoint).await,
            Some(MediaObjectKind::WebRtcEndpoint)
        );
    }

    #[tokio::test]
    async fn test_released_objects_leave_live_tables() {
        let engine = InMemoryMediaEngine::new();
        let pipeline = engine.create_pipeline("R1").await.unwrap();
        let composite = engine.create_composite(&pipeline).await.unwrap();
        let port = engine.create_hub_port(&composite).await.unwrap();
        let endpoint = engine.create_endpoint(&pipeline).await.unwrap();
        engine.connect(&endpoint, &port).await.unwrap();
        engine.process_offer(&endpoint, "v=0").await.unwrap();

        engine.release(&pipeline).await.unwrap();

        let state = engine.state.lock().await;
        assert!(state.objects.is_empty());
        assert!(state.connections.is_empty());
        assert!(state.offers.is_empty());
        assert_eq!(state.released.len(), 4);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let engine = InMemoryMediaEngine::new();
        for _ in 0..HISTORY_LIMIT + 10 {
            let pipeline = engine.create_pipeline("R1").await.unwrap();
            let recorder = engine
                .create_recorder(&pipeline, "file:///tmp/R1.webm", MediaProfile::Webm)
                .await
                .unwrap();
            engine.stop(&recorder).await.unwrap();
            engine.release(&pipeline).await.unwrap();
        }

        assert_eq!(engine.release_requests().await.len(), HISTORY_LIMIT);
        assert_eq!(engine.recorders().await.len(), HISTORY_LIMIT);
        let state = engine.state.lock().await;
        assert!(state.objects.is_empty());
        assert_eq!(state.released.len(), HISTORY_LIMIT);
    }
}
