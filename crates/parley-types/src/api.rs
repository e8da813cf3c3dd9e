use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserProfile;
use crate::reactions::ReactionSet;

// -- JWT Claims --

/// JWT claims shared by the REST middleware, session issuance, and the
/// WebSocket upgrade. `jti` makes every minted token unique even when two
/// are signed within the same second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub kind: TokenKind,
    pub jti: Uuid,
}

/// Discriminates access tokens from refresh tokens so that one can never be
/// presented where the other is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

// -- Sessions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// -- Messages --

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub room: String,
    pub sender: String,
    pub content: String,
    pub reactions: ReactionSet,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Rooms --

/// One entry in the room overview: the room name plus a glimpse of its
/// latest traffic, derived entirely from stored messages.
#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub room: String,
    pub last_message: String,
    pub last_sender: String,
    pub last_at: chrono::DateTime<chrono::Utc>,
    pub message_count: i64,
}
