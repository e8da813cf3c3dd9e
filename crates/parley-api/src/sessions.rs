use anyhow::anyhow;
use chrono::{Duration, SecondsFormat, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::UserRow;
use parley_types::api::{Claims, TokenKind};

use crate::error::ApiError;

const ACCESS_TTL_HOURS: i64 = 1;
const REFRESH_TTL_DAYS: i64 = 7;

/// Signed tokens handed out together at login/signup.
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues, verifies, and rotates the two token kinds. Stateless apart from
/// the refresh-token table it maintains through [`Database`].
#[derive(Clone)]
pub struct Sessions {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Sessions {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl: Duration::hours(ACCESS_TTL_HOURS),
            refresh_ttl: Duration::days(REFRESH_TTL_DAYS),
        }
    }

    /// Same service with custom lifetimes. Tests use this to fabricate
    /// already-expired tokens.
    pub fn with_ttls(
        secret: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Mints a fresh access/refresh pair and stores the refresh token,
    /// replacing any prior one for this user inside a single transaction.
    /// Two concurrent logins therefore end with exactly one stored token
    /// and the loser's copy dead on arrival.
    pub fn issue(&self, db: &Database, user_id: Uuid) -> Result<TokenPair, ApiError> {
        let access = self.mint(user_id, TokenKind::Access, self.access_ttl)?;
        let refresh = self.mint(user_id, TokenKind::Refresh, self.refresh_ttl)?;

        let expires_at = (Utc::now() + self.refresh_ttl).to_rfc3339_opts(SecondsFormat::Secs, true);
        db.replace_refresh_token(&user_id.to_string(), &refresh, &expires_at)?;

        Ok(TokenPair { access, refresh })
    }

    /// Checks signature, expiry, and kind. The caller is responsible for
    /// loading the account and applying the verified-email gate.
    pub fn verify_access(&self, token: &str) -> Result<Claims, ApiError> {
        let claims = self
            .decode_claims(token)
            .map_err(|_| ApiError::Unauthenticated("Invalid token"))?;
        if claims.kind != TokenKind::Access {
            return Err(ApiError::Unauthenticated("Invalid token"));
        }
        Ok(claims)
    }

    /// Exchanges a stored, unexpired refresh token for a fresh access
    /// token. The refresh token itself is not rotated and keeps working
    /// until it expires or a new login replaces it.
    pub fn rotate(&self, db: &Database, refresh: &str) -> Result<(String, UserRow), ApiError> {
        let stored = db
            .get_refresh_token(refresh)?
            .ok_or(ApiError::SessionExpired("Invalid or expired refresh token"))?;

        let expires_at = stored
            .expires_at
            .parse::<chrono::DateTime<Utc>>()
            .map_err(|e| anyhow!("Corrupt expires_at on refresh token: {e}"))?;
        if expires_at < Utc::now() {
            return Err(ApiError::SessionExpired("Invalid or expired refresh token"));
        }

        let claims = self
            .decode_claims(refresh)
            .map_err(|_| ApiError::SessionExpired("Invalid refresh token"))?;
        if claims.kind != TokenKind::Refresh {
            return Err(ApiError::SessionExpired("Invalid refresh token"));
        }

        let user = db
            .get_user_by_id(&claims.sub.to_string())?
            .ok_or(ApiError::SessionExpired("Invalid refresh token"))?;

        let access = self.mint(claims.sub, TokenKind::Access, self.access_ttl)?;
        Ok((access, user))
    }

    fn mint(&self, user_id: Uuid, kind: TokenKind, ttl: Duration) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user_id,
            exp: (Utc::now() + ttl).timestamp() as usize,
            kind,
            jti: Uuid::new_v4(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| anyhow!("Failed to sign token: {e}"))?;

        Ok(token)
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::Database;

    fn seeded_db() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.create_user(
            &user_id.to_string(),
            "alice",
            "alice@example.com",
            "argon2-hash",
            "verify-alice",
        )
        .unwrap();
        (db, user_id)
    }

    #[test]
    fn issue_then_verify_access_round_trips() {
        let (db, user_id) = seeded_db();
        let sessions = Sessions::new("test-secret");

        let pair = sessions.issue(&db, user_id).unwrap();
        let claims = sessions.verify_access(&pair.access).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let (db, user_id) = seeded_db();
        // Expired two hours ago, well past any decoder leeway
        let sessions = Sessions::with_ttls("test-secret", Duration::hours(-2), Duration::days(7));

        let pair = sessions.issue(&db, user_id).unwrap();
        assert!(matches!(
            sessions.verify_access(&pair.access),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (db, user_id) = seeded_db();
        let sessions = Sessions::new("test-secret");

        let pair = sessions.issue(&db, user_id).unwrap();
        assert!(matches!(
            sessions.verify_access(&pair.refresh),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn access_token_cannot_be_used_to_rotate() {
        let (db, user_id) = seeded_db();
        let sessions = Sessions::new("test-secret");

        let pair = sessions.issue(&db, user_id).unwrap();
        assert!(matches!(
            sessions.rotate(&db, &pair.access),
            Err(ApiError::SessionExpired(_))
        ));
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let (db, user_id) = seeded_db();
        let foreign = Sessions::new("other-secret");
        let pair = foreign.issue(&db, user_id).unwrap();

        let sessions = Sessions::new("test-secret");
        assert!(matches!(
            sessions.verify_access(&pair.access),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn reissue_invalidates_the_previous_refresh_token() {
        let (db, user_id) = seeded_db();
        let sessions = Sessions::new("test-secret");

        let first = sessions.issue(&db, user_id).unwrap();
        let second = sessions.issue(&db, user_id).unwrap();

        assert_eq!(db.count_refresh_tokens(&user_id.to_string()).unwrap(), 1);
        assert!(matches!(
            sessions.rotate(&db, &first.refresh),
            Err(ApiError::SessionExpired(_))
        ));

        let (access, user) = sessions.rotate(&db, &second.refresh).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(sessions.verify_access(&access).unwrap().sub, user_id);

        // Rotation must not touch the stored refresh token
        assert!(db.get_refresh_token(&second.refresh).unwrap().is_some());
    }

    #[test]
    fn rotate_rejects_an_expired_refresh_token() {
        let (db, user_id) = seeded_db();
        let sessions = Sessions::with_ttls("test-secret", Duration::hours(1), Duration::days(-1));

        let pair = sessions.issue(&db, user_id).unwrap();
        assert!(matches!(
            sessions.rotate(&db, &pair.refresh),
            Err(ApiError::SessionExpired(_))
        ));
    }
}
