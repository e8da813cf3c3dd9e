use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reactions::ReactionSet;

fn general_room() -> String {
    "general".to_string()
}

/// Events sent over the WebSocket gateway, server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A message was persisted and fanned out to its room
    ChatMessage {
        id: Uuid,
        content: String,
        sender: String,
        timestamp: String,
        reactions: ReactionSet,
    },

    /// Someone else in the room is typing
    Typing { username: String },

    /// Full reaction state of a message after a toggle
    ReactionUpdated {
        message_id: Uuid,
        reactions: ReactionSet,
    },

    /// A command from this connection could not be carried out
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayCommand {
    /// Subscribe this connection to a room
    JoinRoom { room: String },

    /// Post a message to a room
    ChatMessage {
        content: String,
        #[serde(default = "general_room")]
        room: String,
        user_id: Uuid,
    },

    /// Tell everyone else in the room that this user is typing
    Typing { room: String, username: String },

    /// Toggle an emoji reaction on a message
    MessageReaction {
        message_id: Uuid,
        emoji: String,
        user_id: Uuid,
        room: String,
    },
}
