use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{MediaEngine, MediaObjectId, MediaObjectKind};
use crate::error::{GroupCallError, Result};
use crate::recording::MediaProfile;

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResult>>>>;
type RpcResult = std::result::Result<Value, RpcError>;

#[derive(Debug, Clone)]
enum RpcError {
    Transport(String),
    Remote { code: i64, message: String },
}

impl RpcError {
    /// Transport failures keep their own variant; server-side refusals are
    /// reported as the failure kind of the operation that was attempted.
    fn into_error(self, wrap: fn(String) -> GroupCallError) -> GroupCallError {
        match self {
            RpcError::Transport(msg) => GroupCallError::MediaEngineTransport(msg),
            RpcError::Remote { code, message } => wrap(format!("{} (code {})", message, code)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcErrorBody>,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client for a Kurento-compatible media server
pub struct KurentoClient {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    closed: Arc<AtomicBool>,
    session_id: Arc<RwLock<Option<String>>>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl KurentoClient {
    pub async fn connect(uri: &str, request_timeout: Duration) -> Result<Self> {
        let (ws_stream, _) = connect_async(uri)
            .await
            .map_err(|e| GroupCallError::transport(format!("connect to {}: {}", uri, e)))?;
        tracing::info!(uri = %uri, "Connected to media server");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let session_id = Arc::new(RwLock::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    tracing::error!(error = %e, "Failed to send media server request");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_session = Arc::clone(&session_id);
        let reader_closed = Arc::clone(&closed);
        let reader_task = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        Self::dispatch(&text, &reader_pending, &reader_session).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "Media server connection error");
                        break;
                    }
                }
            }

            tracing::warn!("Media server connection closed");
            let mut pending = reader_pending.lock().await;
            reader_closed.store(true, Ordering::SeqCst);
            for (_, waiter) in pending.drain() {
                let _ = waiter.send(Err(RpcError::Transport("connection closed".to_string())));
            }
        });

        Ok(Self {
            outgoing: tx,
            pending,
            closed,
            session_id,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader_task,
            writer_task,
        })
    }

    async fn dispatch(text: &str, pending: &PendingRequests, session_id: &RwLock<Option<String>>) {
        let response: RpcResponse = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Unparseable media server message");
                return;
            }
        };

        let Some(id) = response.id else {
            // Server-initiated notifications (onEvent) carry no id
            tracing::debug!(method = ?response.method, "Ignoring media server notification");
            return;
        };

        let outcome = match (response.result, response.error) {
            (_, Some(error)) => Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => {
                if let Some(session) = result.get("sessionId").and_then(Value::as_str) {
                    let mut current = session_id.write().await;
                    if current.as_deref() != Some(session) {
                        *current = Some(session.to_string());
                    }
                }
                Ok(result)
            }
            (None, None) => Ok(Value::Null),
        };

        match pending.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(outcome);
            }
            None => tracing::debug!(id = id, "Response for unknown or expired request"),
        }
    }

    async fn request(&self, method: &str, mut params: Value) -> RpcResult {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        if let Some(session) = self.session_id.read().await.clone() {
            if let Some(map) = params.as_object_mut() {
                map.insert("sessionId".to_string(), Value::String(session));
            }
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(RpcError::Transport("connection closed".to_string()));
            }
            pending.insert(id, tx);
        }

        if self.outgoing.send(Message::Text(body.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::Transport("connection closed".to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Transport("connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Transport(format!(
                    "{} request timed out after {:?}",
                    method, self.request_timeout
                )))
            }
        }
    }

    async fn create(&self, kind: MediaObjectKind, constructor_params: Value) -> Result<MediaObjectId> {
        let result = self
            .request(
                "create",
                json!({
                    "type": kind.as_str(),
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await
            .map_err(|e| e.into_error(GroupCallError::MediaAllocation))?;

        result
            .get("value")
            .and_then(Value::as_str)
            .map(MediaObjectId::new)
            .ok_or_else(|| GroupCallError::allocation(format!("create {} returned no object id", kind)))
    }

    async fn invoke(
        &self,
        object: &MediaObjectId,
        operation: &str,
        operation_params: Value,
        wrap: fn(String) -> GroupCallError,
    ) -> Result<Value> {
        let result = self
            .request(
                "invoke",
                json!({
                    "object": object.as_str(),
                    "operation": operation,
                    "operationParams": operation_params,
                }),
            )
            .await
            .map_err(|e| e.into_error(wrap))?;

        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }
}

impl Drop for KurentoClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

#[async_trait]
impl MediaEngine for KurentoClient {
    async fn create_pipeline(&self, room_name: &str) -> Result<MediaObjectId> {
        let id = self.create(MediaObjectKind::MediaPipeline, json!({})).await?;
        tracing::debug!(room = %room_name, pipeline = %id, "Media pipeline created");
        Ok(id)
    }

    async fn create_composite(&self, pipeline: &MediaObjectId) -> Result<MediaObjectId> {
        self.create(
            MediaObjectKind::Composite,
            json!({ "mediaPipeline": pipeline.as_str() }),
        )
        .await
    }

    async fn create_hub_port(&self, composite: &MediaObjectId) -> Result<MediaObjectId> {
        self.create(MediaObjectKind::HubPort, json!({ "hub": composite.as_str() }))
            .await
    }

    async fn create_endpoint(&self, pipeline: &MediaObjectId) -> Result<MediaObjectId> {
        self.create(
            MediaObjectKind::WebRtcEndpoint,
            json!({ "mediaPipeline": pipeline.as_str() }),
        )
        .await
    }

    async fn create_recorder(
        &self,
        pipeline: &MediaObjectId,
        uri: &str,
        profile: MediaProfile,
    ) -> Result<MediaObjectId> {
        self.create(
            MediaObjectKind::RecorderEndpoint,
            json!({
                "mediaPipeline": pipeline.as_str(),
                "uri": uri,
                "mediaProfile": profile.as_str(),
            }),
        )
        .await
    }

    async fn process_offer(&self, endpoint: &MediaObjectId, sdp_offer: &str) -> Result<String> {
        let value = self
            .invoke(
                endpoint,
                "processOffer",
                json!({ "offer": sdp_offer }),
                GroupCallError::Negotiation,
            )
            .await?;

        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GroupCallError::Negotiation("processOffer returned no answer".to_string()))
    }

    async fn connect(&self, source: &MediaObjectId, sink: &MediaObjectId) -> Result<()> {
        self.invoke(
            source,
            "connect",
            json!({ "sink": sink.as_str() }),
            GroupCallError::MediaAllocation,
        )
        .await?;
        Ok(())
    }

    async fn record(&self, recorder: &MediaObjectId) -> Result<()> {
        self.invoke(recorder, "record", json!({}), GroupCallError::MediaAllocation)
            .await?;
        Ok(())
    }

    async fn stop(&self, recorder: &MediaObjectId) -> Result<()> {
        self.invoke(recorder, "stop", json!({}), GroupCallError::Internal)
            .await?;
        Ok(())
    }

    async fn release(&self, object: &MediaObjectId) -> Result<()> {
        self.request("release", json!({ "object": object.as_str() }))
            .await
            .map_err(|e| e.into_error(GroupCallError::Release))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Minimal media server: answers `create` with sequential ids, echoes
    /// `processOffer`, refuses operations named `explode`, and forwards every
    /// request it sees to the test.
    async fn fake_media_server(respond: bool) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut created = 0;

            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                let _ = seen_tx.send(request.clone());
                if !respond {
                    continue;
                }

                let id = request["id"].clone();
                let params = &request["params"];
                let response = match request["method"].as_str().unwrap() {
                    "create" => {
                        created += 1;
                        json!({"jsonrpc": "2.0", "id": id, "result": {
                            "value": format!("obj{}_kurento.{}", created, params["type"].as_str().unwrap()),
                            "sessionId": "session-1"
                        }})
                    }
                    "invoke" if params["operation"] == "explode" => {
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": 40101, "message": "boom"}})
                    }
                    "invoke" if params["operation"] == "processOffer" => {
                        json!({"jsonrpc": "2.0", "id": id, "result": {
                            "value": format!("answer-to:{}", params["operationParams"]["offer"].as_str().unwrap()),
                            "sessionId": "session-1"
                        }})
                    }
                    _ => json!({"jsonrpc": "2.0", "id": id, "result": {"sessionId": "session-1"}}),
                };

                // Unsolicited notification first, to make sure it is skipped
                ws.send(Message::Text(
                    json!({"jsonrpc": "2.0", "method": "onEvent", "params": {}}).to_string(),
                ))
                .await
                .unwrap();
                ws.send(Message::Text(response.to_string())).await.unwrap();
            }
        });

        (format!("ws://{}", addr), seen_rx)
    }

    #[tokio::test]
    async fn test_create_and_session_tracking() {
        let (uri, mut seen) = fake_media_server(true).await;
        let client = KurentoClient::connect(&uri, Duration::from_secs(2)).await.unwrap();

        let pipeline = client.create_pipeline("R1").await.unwrap();
        assert_eq!(pipeline.as_str(), "obj1_kurento.MediaPipeline");

        let endpoint = client.create_endpoint(&pipeline).await.unwrap();
        assert_eq!(endpoint.as_str(), "obj2_kurento.WebRtcEndpoint");

        let first = seen.recv().await.unwrap();
        assert_eq!(first["method"], "create");
        assert_eq!(first["params"]["type"], "MediaPipeline");
        assert!(first["params"].get("sessionId").is_none());

        let second = seen.recv().await.unwrap();
        assert_eq!(second["params"]["constructorParams"]["mediaPipeline"], "obj1_kurento.MediaPipeline");
        assert_eq!(second["params"]["sessionId"], "session-1");
    }

    #[tokio::test]
    async fn test_process_offer_and_connect() {
        let (uri, mut seen) = fake_media_server(true).await;
        let client = KurentoClient::connect(&uri, Duration::from_secs(2)).await.unwrap();

        let endpoint = MediaObjectId::new("ep");
        let answer = client.process_offer(&endpoint, "v=0").await.unwrap();
        assert_eq!(answer, "answer-to:v=0");

        client
            .connect(&endpoint, &MediaObjectId::new("port"))
            .await
            .unwrap();

        let _offer = seen.recv().await.unwrap();
        let connect = seen.recv().await.unwrap();
        assert_eq!(connect["params"]["object"], "ep");
        assert_eq!(connect["params"]["operation"], "connect");
        assert_eq!(connect["params"]["operationParams"]["sink"], "port");
    }

    #[tokio::test]
    async fn test_remote_error_maps_to_operation_kind() {
        let (uri, _seen) = fake_media_server(true).await;
        let client = KurentoClient::connect(&uri, Duration::from_secs(2)).await.unwrap();

        let err = client
            .invoke(
                &MediaObjectId::new("ep"),
                "explode",
                json!({}),
                GroupCallError::Negotiation,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GroupCallError::Negotiation(ref msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (uri, _seen) = fake_media_server(false).await;
        let client = KurentoClient::connect(&uri, Duration::from_millis(100)).await.unwrap();

        let err = client.release(&MediaObjectId::new("ep")).await.unwrap_err();
        assert!(matches!(err, GroupCallError::MediaEngineTransport(_)));
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = KurentoClient::connect(&format!("ws://{}", addr), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GroupCallError::MediaEngineTransport(_))));
    }

    #[tokio::test]
    async fn test_requests_fail_once_server_goes_away() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
        });

        let client = KurentoClient::connect(&format!("ws://{}", addr), Duration::from_secs(5))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = client.create_pipeline("R1").await.unwrap_err();
        assert!(matches!(err, GroupCallError::MediaEngineTransport(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
