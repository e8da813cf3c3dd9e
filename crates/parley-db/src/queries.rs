use crate::Database;
use crate::models::{MessageRow, RefreshTokenRow, RoomSummaryRow, UserRow};
use anyhow::Result;
use parley_types::reactions::ReactionSet;
use rusqlite::Connection;
use tracing::warn;

const USER_COLUMNS: &str =
    "id, username, email, password, external_id, verified, verification_token, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        verification_token: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, verification_token)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, email, password_hash, verification_token),
            )?;
            Ok(())
        })
    }

    /// Account backed by an external identity provider: no password column,
    /// identified by the provider's subject id instead.
    pub fn create_external_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        external_id: &str,
        verification_token: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, external_id, verification_token)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, email, external_id, verification_token),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "external_id = ?1", external_id))
    }

    /// Signup conflict lookup: any existing row claiming either the
    /// username or the email.
    pub fn find_user_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?2");
            let mut stmt = conn.prepare(&sql)?;

            let row = stmt.query_row((username, email), user_from_row).optional()?;
            Ok(row)
        })
    }

    /// Marks the owning user verified and burns the token. Returns the
    /// updated user, or `None` when the token matches nobody (unknown or
    /// already used).
    pub fn consume_verification_token(&self, token: &str) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let Some(mut user) = query_user(conn, "verification_token = ?1", token)? else {
                return Ok(None);
            };

            conn.execute(
                "UPDATE users SET verified = 1, verification_token = NULL WHERE id = ?1",
                [&user.id],
            )?;

            user.verified = true;
            user.verification_token = None;
            Ok(Some(user))
        })
    }

    // -- Refresh tokens --

    /// Drops every stored refresh token for the user and installs the new
    /// one. Runs in a single transaction so two concurrent logins can never
    /// leave two live tokens behind: last writer wins.
    pub fn replace_refresh_token(&self, user_id: &str, token: &str, expires_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM refresh_tokens WHERE user_id = ?1", [user_id])?;
            tx.execute(
                "INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                (token, user_id, expires_at),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT token, user_id, expires_at, created_at
                     FROM refresh_tokens WHERE token = ?1",
                    [token],
                    |row| {
                        Ok(RefreshTokenRow {
                            token: row.get(0)?,
                            user_id: row.get(1)?,
                            expires_at: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn count_refresh_tokens(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, room, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// The `limit` most recent messages in a room, returned oldest-first.
    pub fn recent_messages(&self, room: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent_messages(conn, room, limit))
    }

    /// One summary per room that has at least one message: its latest
    /// message plus a running count, most recently active room first.
    pub fn room_summaries(&self) -> Result<Vec<RoomSummaryRow>> {
        self.with_conn(query_room_summaries)
    }

    // -- Reactions --

    /// Flips `user_id`'s reaction under `emoji` on a message and persists
    /// the updated set. The whole read-modify-write cycle happens under the
    /// connection lock, so concurrent toggles serialize rather than losing
    /// updates. Returns `None` when the message or the user does not exist.
    pub fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<ReactionSet>> {
        self.with_conn_mut(|conn| {
            let username: Option<String> = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [user_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(username) = username else {
                return Ok(None);
            };

            let stored: Option<String> = conn
                .query_row(
                    "SELECT reactions FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(stored) = stored else {
                return Ok(None);
            };

            let mut reactions: ReactionSet = serde_json::from_str(&stored).unwrap_or_else(|e| {
                warn!("Corrupt reactions on message {}: {}", message_id, e);
                ReactionSet::new()
            });
            reactions.toggle(emoji, &username);

            conn.execute(
                "UPDATE messages SET reactions = ?1 WHERE id = ?2",
                (serde_json::to_string(&reactions)?, message_id),
            )?;
            Ok(Some(reactions))
        })
    }
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        external_id: row.get(4)?,
        verified: row.get(5)?,
        verification_token: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_user(conn: &Connection, where_clause: &str, param: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {where_clause}");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([param], user_from_row).optional()?;
    Ok(row)
}

fn query_recent_messages(conn: &Connection, room: &str, limit: u32) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the sender's display name in a single query.
    // Newest rows first so LIMIT keeps the most recent; rowid breaks ties
    // between messages sharing a timestamp.
    let mut stmt = conn.prepare(
        "SELECT m.id, m.room, m.sender_id, u.username, m.content, m.reactions, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.room = ?1
         ORDER BY m.created_at DESC, m.rowid DESC
         LIMIT ?2",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![room, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                room: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                reactions: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Chat history reads oldest-first
    rows.reverse();
    Ok(rows)
}

fn query_room_summaries(conn: &Connection) -> Result<Vec<RoomSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.room, m.content, u.username, m.created_at, counts.message_count
         FROM messages m
         JOIN (SELECT room, MAX(rowid) AS last_rowid, COUNT(*) AS message_count
               FROM messages
               GROUP BY room) counts
           ON m.rowid = counts.last_rowid
         LEFT JOIN users u ON m.sender_id = u.id
         ORDER BY m.created_at DESC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RoomSummaryRow {
                room: row.get(0)?,
                last_message: row.get(1)?,
                last_sender: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| "unknown".to_string()),
                last_at: row.get(3)?,
                message_count: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
