use axum::{Extension, Json, extract::State};
use tracing::error;

use parley_db::models::RoomSummaryRow;
use parley_types::api::RoomSummary;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::messages::parse_timestamp;
use crate::middleware::CurrentUser;

/// Overview of every room that has seen at least one message, most
/// recently active first. Rooms are not provisioned anywhere; they exist
/// by virtue of messages naming them.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.room_summaries())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::anyhow!("join error: {e}")
        })??;

    Ok(Json(rows.into_iter().map(summarize).collect()))
}

fn summarize(row: RoomSummaryRow) -> RoomSummary {
    let last_at = parse_timestamp(&row.last_at, &row.room);
    RoomSummary {
        room: row.room,
        last_message: row.last_message,
        last_sender: row.last_sender,
        last_at,
        message_count: row.message_count,
    }
}
