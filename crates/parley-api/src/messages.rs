use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use parley_db::models::MessageRow;
use parley_types::api::MessageResponse;
use parley_types::reactions::ReactionSet;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::CurrentUser;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_room")]
    pub room: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_room() -> String {
    "general".to_string()
}

fn default_limit() -> u32 {
    50
}

/// Room history: the most recent messages, oldest-first so clients can
/// render them top to bottom as received.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    Extension(_user): Extension<CurrentUser>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    // Run the blocking DB read off the async runtime
    let db = state.db.clone();
    let room = query.room;
    let limit = query.limit.min(200);

    let rows = tokio::task::spawn_blocking(move || db.recent_messages(&room, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::anyhow!("join error: {e}")
        })??;

    Ok(Json(rows.into_iter().map(materialize).collect()))
}

fn materialize(row: MessageRow) -> MessageResponse {
    let reactions: ReactionSet = serde_json::from_str(&row.reactions).unwrap_or_else(|e| {
        warn!("Corrupt reactions on message '{}': {}", row.id, e);
        ReactionSet::new()
    });
    let created_at = parse_timestamp(&row.created_at, &row.id);

    MessageResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        room: row.room,
        sender: row.sender_username,
        content: row.content,
        reactions,
        created_at,
    }
}

pub(crate) fn parse_timestamp(raw: &str, context: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') default stores "YYYY-MM-DD HH:MM:SS"
            // without a timezone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on '{}': {}", raw, context, e);
            chrono::DateTime::default()
        })
}
