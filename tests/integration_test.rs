// Integration tests for the group call server
// Each test serves the real routes on an ephemeral port backed by the in-memory media engine

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use groupcall_server::api;
use groupcall_server::config::RecordingConfig;
use groupcall_server::groupcall::RoomManager;
use groupcall_server::media::sdp::SAMPLE_OFFER;
use groupcall_server::media::{InMemoryMediaEngine, MediaEngine, MediaObjectKind};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    engine: Arc<InMemoryMediaEngine>,
    registry: Arc<RoomManager>,
}

fn start_server() -> TestServer {
    let engine = Arc::new(InMemoryMediaEngine::new());
    let media: Arc<dyn MediaEngine> = engine.clone();
    let registry = Arc::new(RoomManager::new(media, RecordingConfig::default()));

    let (addr, server) = warp::serve(api::routes(registry.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    TestServer {
        addr,
        engine,
        registry,
    }
}

async fn connect(server: &TestServer) -> Client {
    let url = format!("ws://{}/groupcall", server.addr);
    let (ws, _) = connect_async(url).await.expect("Failed to connect");
    ws
}

async fn send(ws: &mut Client, message: Value) {
    ws.send(Message::Text(message.to_string())).await.expect("Failed to send");
}

async fn join(ws: &mut Client, room: &str, name: &str) {
    send(
        ws,
        json!({"id": "joinRoom", "name": name, "room": room, "sdpOffer": SAMPLE_OFFER}),
    )
    .await;
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("Server sent invalid JSON");
        }
    }
}

async fn expect_silence(ws: &mut Client) {
    let next = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "Unexpected message: {:?}", next);
}

/// Polls until `condition` holds, since disconnect handling runs server-side
async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("Condition not reached in time");
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_server();
    let url = format!("http://{}/groupcall/health", server.addr);

    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), 200, "Health endpoint should return 200 OK");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "Group Call Server");
}

#[tokio::test]
async fn test_single_join_flow() {
    let server = start_server();
    let mut alice = connect(&server).await;

    join(&mut alice, "R1", "alice").await;

    let answer = recv(&mut alice).await;
    assert_eq!(answer["id"], "answer_sdp");
    assert!(answer["answer_sdp"].as_str().unwrap().starts_with("v=0"));

    assert_eq!(
        recv(&mut alice).await,
        json!({"id": "existingParticipants", "data": []})
    );

    let url = format!("http://{}/groupcall/rooms", server.addr);
    let rooms: Value = reqwest::get(url).await.unwrap().json().await.unwrap();
    assert_eq!(rooms, json!([{"room": "R1", "participants": ["alice"]}]));
}

#[tokio::test]
async fn test_two_party_notifications() {
    let server = start_server();
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;

    join(&mut alice, "R1", "alice").await;
    recv(&mut alice).await;
    recv(&mut alice).await;

    join(&mut bob, "R1", "bob").await;
    assert_eq!(recv(&mut bob).await["id"], "answer_sdp");
    assert_eq!(
        recv(&mut bob).await,
        json!({"id": "existingParticipants", "data": ["alice"]})
    );
    assert_eq!(
        recv(&mut alice).await,
        json!({"id": "newParticipantArrived", "name": "bob"})
    );

    // Disconnecting counts as leaving
    bob.close(None).await.unwrap();
    assert_eq!(
        recv(&mut alice).await,
        json!({"id": "participantLeft", "name": "bob"})
    );

    let room = server.registry.get("R1").await.unwrap();
    assert_eq!(room.participant_names().await, vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let server = start_server();
    let mut alice = connect(&server).await;
    let mut impostor = connect(&server).await;

    join(&mut alice, "R1", "alice").await;
    recv(&mut alice).await;
    recv(&mut alice).await;

    join(&mut impostor, "R1", "alice").await;
    let rejected = recv(&mut impostor).await;
    assert_eq!(rejected["id"], "joinRejected");
    assert!(rejected["message"].as_str().unwrap().contains("alice"));

    // The member already inside hears nothing about the failed attempt
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn test_invalid_offer_rejected() {
    let server = start_server();
    let mut alice = connect(&server).await;

    send(
        &mut alice,
        json!({"id": "joinRoom", "name": "alice", "room": "R1", "sdpOffer": ""}),
    )
    .await;

    assert_eq!(recv(&mut alice).await["id"], "joinRejected");
    assert!(server.registry.get("R1").await.is_none());
}

#[tokio::test]
async fn test_malformed_message_is_ignored() {
    let server = start_server();
    let mut alice = connect(&server).await;

    alice.send(Message::Text("not json".to_string())).await.unwrap();
    send(&mut alice, json!({"id": "receiveVideoFrom", "sender": "bob"})).await;

    // The session survives and still accepts a join
    join(&mut alice, "R1", "alice").await;
    assert_eq!(recv(&mut alice).await["id"], "answer_sdp");
}

#[tokio::test]
async fn test_last_leave_tears_down_room() {
    let server = start_server();
    let mut alice = connect(&server).await;

    join(&mut alice, "R1", "alice").await;
    recv(&mut alice).await;
    recv(&mut alice).await;
    assert_eq!(server.engine.live_count(MediaObjectKind::MediaPipeline).await, 1);

    send(&mut alice, json!({"id": "leaveRoom"})).await;

    let registry = server.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.get("R1").await.is_none() }
    })
    .await;

    let engine = server.engine.clone();
    eventually(|| {
        let engine = engine.clone();
        async move {
            engine.live_count(MediaObjectKind::MediaPipeline).await == 0
                && engine.live_count(MediaObjectKind::WebRtcEndpoint).await == 0
                && engine.live_count(MediaObjectKind::RecorderEndpoint).await == 0
        }
    })
    .await;
}

#[tokio::test]
async fn test_room_recording_starts_once() {
    let server = start_server();
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;

    join(&mut alice, "team sync", "alice").await;
    recv(&mut alice).await;
    recv(&mut alice).await;
    join(&mut bob, "team sync", "bob").await;
    recv(&mut bob).await;
    recv(&mut bob).await;

    let recorders = server.engine.recorders().await;
    assert_eq!(recorders.len(), 1);
    assert_eq!(recorders[0].uri, "file:///tmp/team%20sync.webm");
}
