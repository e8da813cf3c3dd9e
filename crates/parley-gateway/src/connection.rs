use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::reactions::ReactionSet;

use crate::broker::RoomBroker;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Identity behind one WebSocket connection. The access token was already
/// checked at the HTTP upgrade layer, so whoever holds this is
/// authenticated and verified.
#[derive(Debug, Clone)]
pub struct ConnectedUser {
    pub user_id: Uuid,
    pub username: String,
}

/// Handle a pre-authenticated WebSocket connection: send Ready, attach to
/// the broker, then pump events both ways until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    broker: RoomBroker,
    db: Arc<Database>,
    user: ConnectedUser,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", user.username, user.user_id);

    let ready = GatewayEvent::Ready {
        user_id: user.user_id,
        username: user.username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    let (conn_id, mut event_rx) = broker.attach();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broker events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let broker_recv = broker.clone();
    let db_recv = db.clone();
    let user_recv = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&broker_recv, &db_recv, &user_recv, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            user_recv.username,
                            user_recv.user_id,
                            e,
                            frame_preview(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    broker.detach(conn_id);
    info!("{} ({}) disconnected from gateway", user.username, user.user_id);
}

/// Dispatch one client command. Separate from the socket loop so the chat,
/// reaction, and typing flows can be driven directly in tests.
pub async fn handle_command(
    broker: &RoomBroker,
    db: &Arc<Database>,
    user: &ConnectedUser,
    conn_id: Uuid,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::JoinRoom { room } => {
            broker.join(conn_id, &room);
            info!(
                "{} ({}) joined room {} ({} subscribers)",
                user.username,
                user.user_id,
                room,
                broker.subscriber_count(&room)
            );
        }

        GatewayCommand::ChatMessage {
            content,
            room,
            user_id,
        } => {
            if user_id != user.user_id {
                warn!(
                    "{} ({}) sent a chat-message claiming user {}, using the authenticated identity",
                    user.username, user.user_id, user_id
                );
            }
            handle_chat_message(broker, db, user, conn_id, &room, &content).await;
        }

        GatewayCommand::Typing { room, username } => {
            broker.publish_except(&room, GatewayEvent::Typing { username }, conn_id);
        }

        GatewayCommand::MessageReaction {
            message_id,
            emoji,
            user_id,
            room,
        } => {
            if user_id != user.user_id {
                warn!(
                    "{} ({}) sent a reaction claiming user {}, using the authenticated identity",
                    user.username, user.user_id, user_id
                );
            }
            handle_reaction(broker, db, user, conn_id, &room, message_id, &emoji).await;
        }
    }
}

/// Persist a chat message, then fan it out to the room. The broadcast only
/// ever follows a successful insert; on failure the sender alone hears
/// about it.
async fn handle_chat_message(
    broker: &RoomBroker,
    db: &Arc<Database>,
    user: &ConnectedUser,
    conn_id: Uuid,
    room: &str,
    content: &str,
) {
    let content = content.trim();
    if content.is_empty() {
        broker.send_to(
            conn_id,
            GatewayEvent::Error {
                message: "Message cannot be empty".to_string(),
            },
        );
        return;
    }

    let id = Uuid::new_v4();
    let now = Utc::now();

    let stored = {
        let db = db.clone();
        let id = id.to_string();
        let room = room.to_string();
        let sender_id = user.user_id.to_string();
        let content = content.to_string();
        let created_at = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        tokio::task::spawn_blocking(move || {
            db.insert_message(&id, &room, &sender_id, &content, &created_at)
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r)
    };

    match stored {
        Ok(()) => {
            broker.publish(
                room,
                GatewayEvent::ChatMessage {
                    id,
                    content: content.to_string(),
                    sender: user.username.clone(),
                    timestamp: now.format("%H:%M").to_string(),
                    reactions: ReactionSet::new(),
                },
            );
        }
        Err(e) => {
            error!("Failed to store message from {}: {}", user.username, e);
            broker.send_to(
                conn_id,
                GatewayEvent::Error {
                    message: "Failed to send message".to_string(),
                },
            );
        }
    }
}

/// Toggle a reaction in the store and broadcast the full updated set to the
/// room. A missing message or user row is reported back to the caller
/// instead of silently dropped.
async fn handle_reaction(
    broker: &RoomBroker,
    db: &Arc<Database>,
    user: &ConnectedUser,
    conn_id: Uuid,
    room: &str,
    message_id: Uuid,
    emoji: &str,
) {
    let toggled = {
        let db = db.clone();
        let message_id = message_id.to_string();
        let user_id = user.user_id.to_string();
        let emoji = emoji.to_string();
        tokio::task::spawn_blocking(move || db.toggle_reaction(&message_id, &user_id, &emoji))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r)
    };

    match toggled {
        Ok(Some(reactions)) => {
            broker.publish(
                room,
                GatewayEvent::ReactionUpdated {
                    message_id,
                    reactions,
                },
            );
        }
        Ok(None) => {
            broker.send_to(
                conn_id,
                GatewayEvent::Error {
                    message: "Message not found".to_string(),
                },
            );
        }
        Err(e) => {
            error!("Failed to toggle reaction for {}: {}", user.username, e);
            broker.send_to(
                conn_id,
                GatewayEvent::Error {
                    message: "Server error".to_string(),
                },
            );
        }
    }
}

/// Truncates a raw frame for logging without splitting a character.
fn frame_preview(text: &str) -> String {
    text.chars().take(200).collect()
}
