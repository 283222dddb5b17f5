//! Live slot updates over WebSocket.
//!
//! Client to server:
//! `{"type":"join_facility","facilityId":"…"}` / `{"type":"leave_facility","facilityId":"…"}`
//!
//! Server to client:
//! `{"type":"slot_updated","facilityId":"…","slotId":"…","slotNumber":"A12","status":"reserved"}`

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::realtime::{SlotBroadcaster, SlotUpdate};

/// Facilities a single connection may follow at once.
const MAX_JOINED_FACILITIES: usize = 20;
const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinFacility { facility_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LeaveFacility { facility_id: Uuid },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    SlotUpdated(SlotUpdate),
    #[serde(rename_all = "camelCase")]
    Joined { facility_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Left { facility_id: Uuid },
    Error { message: String },
}

pub async fn slot_updates(
    ws: WebSocketUpgrade,
    State(broadcaster): State<SlotBroadcaster>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

/// Copies one facility's updates into the connection's outbox until the
/// connection leaves or goes away.
fn forward(
    mut rx: broadcast::Receiver<SlotUpdate>,
    outbox: mpsc::Sender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if outbox.send(ServerMessage::SlotUpdated(update)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket client lagging, skipped slot updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, broadcaster: SlotBroadcaster) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);
    let mut joined: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

    tracing::debug!("WebSocket connection established");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive failed");
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::JoinFacility { facility_id }) => {
                        if joined.contains_key(&facility_id) {
                            ServerMessage::Joined { facility_id }
                        } else if joined.len() >= MAX_JOINED_FACILITIES {
                            ServerMessage::Error {
                                message: format!(
                                    "At most {MAX_JOINED_FACILITIES} facilities can be followed"
                                ),
                            }
                        } else {
                            let rx = broadcaster.subscribe(facility_id).await;
                            joined.insert(facility_id, forward(rx, outbox.clone()));
                            ServerMessage::Joined { facility_id }
                        }
                    }
                    Ok(ClientMessage::LeaveFacility { facility_id }) => {
                        if let Some(task) = joined.remove(&facility_id) {
                            task.abort();
                        }
                        ServerMessage::Left { facility_id }
                    }
                    Err(e) => ServerMessage::Error {
                        message: format!("Unrecognised message: {e}"),
                    },
                };
                if send(&mut sink, &reply).await.is_err() {
                    break;
                }
            }
            Some(message) = inbox.recv() => {
                if send(&mut sink, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, task) in joined.drain() {
        task.abort();
    }
    broadcaster.prune().await;
    tracing::debug!("WebSocket connection closed");
}

async fn send<S>(sink: &mut S, message: &ServerMessage) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(message) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode WebSocket message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SlotStatus;

    #[test]
    fn client_messages_use_camel_case_ids() {
        let id = Uuid::new_v4();
        let msg: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "join_facility",
            "facilityId": id,
        }))
        .unwrap();
        assert!(matches!(msg, ClientMessage::JoinFacility { facility_id } if facility_id == id));
    }

    #[test]
    fn slot_updates_are_tagged() {
        let update = SlotUpdate {
            facility_id: Uuid::nil(),
            slot_id: Uuid::nil(),
            slot_number: "A1".to_string(),
            status: SlotStatus::Reserved,
        };
        let json = serde_json::to_value(ServerMessage::SlotUpdated(update)).unwrap();
        assert_eq!(json["type"], "slot_updated");
        assert_eq!(json["slotNumber"], "A1");
        assert_eq!(json["status"], "reserved");
    }
}
