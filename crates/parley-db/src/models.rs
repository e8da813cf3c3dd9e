//! Database row types. These map directly to SQLite rows and stay distinct
//! from the parley-types API models so the DB layer remains independent of
//! wire shapes.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: Option<String>,
    pub external_id: Option<String>,
    pub verified: bool,
    pub verification_token: Option<String>,
    pub created_at: String,
}

pub struct RefreshTokenRow {
    pub token: String,
    pub user_id: String,
    pub expires_at: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub reactions: String,
    pub created_at: String,
}

pub struct RoomSummaryRow {
    pub room: String,
    pub last_message: String,
    pub last_sender: String,
    pub last_at: String,
    pub message_count: i64,
}
