use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::error::{GroupCallError, Result};
use crate::groupcall::{ClientMessage, RoomManager, SignalingHandler};

pub async fn handle_groupcall_websocket(websocket: WebSocket, registry: Arc<RoomManager>) {
    tracing::info!("New group call WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut signaling_handler = SignalingHandler::new(registry, tx);

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) if message.is_close() => break,
            Ok(message) => {
                if let Err(e) = handle_websocket_message(&mut signaling_handler, message).await {
                    tracing::warn!(error = %e, "Ignoring WebSocket message");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!("Group call WebSocket connection closed");
}

async fn handle_websocket_message(
    signaling_handler: &mut SignalingHandler,
    message: Message,
) -> Result<()> {
    let Ok(text) = message.to_str() else {
        // Pings, pongs and binary frames carry no signaling
        return Ok(());
    };
    tracing::debug!(raw_message = %text, "Received signaling message");

    let client_message = parse_client_message(text)?;
    signaling_handler.handle_message(client_message).await;
    Ok(())
}

fn parse_client_message(text: &str) -> Result<ClientMessage> {
    serde_json::from_str(text)
        .map_err(|e| GroupCallError::InvalidSignalingMessage(format!("{}: {}", e, text)))
}
