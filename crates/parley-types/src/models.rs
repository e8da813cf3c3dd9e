use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of an account, safe to hand to clients. Never carries the
/// password hash or the email verification token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub verified: bool,
}
