use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use rand::Rng;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::UserRow;
use parley_types::api::{AuthResponse, LoginRequest, SignupRequest};
use parley_types::models::UserProfile;

use crate::error::ApiError;
use crate::mailer::Mailer;
use crate::sessions::{Sessions, TokenPair};

/// Name of the httpOnly cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: Sessions,
    pub mailer: Arc<dyn Mailer>,
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim();
    let email = req.email.trim().to_lowercase();

    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "Username, email, and password are required".to_string(),
        ));
    }
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::Validation(
            "Username must be 3-32 characters".to_string(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    if state
        .db
        .find_user_by_username_or_email(username, &email)?
        .is_some()
    {
        return Err(ApiError::Validation(
            "Username or email already exists".to_string(),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();
    let verification_token = generate_verification_token();

    state.db.create_user(
        &user_id.to_string(),
        username,
        &email,
        &password_hash,
        &verification_token,
    )?;
    state
        .mailer
        .send_verification(&email, username, &verification_token);

    let tokens = state.sessions.issue(&state.db, user_id)?;
    info!("New signup: {} ({})", username, user_id);

    let user = UserProfile {
        id: user_id,
        username: username.to_string(),
        email,
        verified: false,
    };
    Ok((
        StatusCode::CREATED,
        refresh_cookie_jar(jar, &tokens),
        Json(AuthResponse {
            access_token: tokens.access,
            user,
            message: Some("Please verify your email to fully activate your account".to_string()),
        }),
    ))
}

/// Password login. Signing in while unverified still succeeds; the caller
/// sees `verified: false` on the returned profile, and protected routes
/// stay closed until the email is confirmed.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();

    let user = state
        .db
        .get_user_by_email(&email)?
        .ok_or(ApiError::InvalidCredentials)?;
    let Some(stored_hash) = user.password.as_deref() else {
        // Externally authenticated account, no password to check against
        return Err(ApiError::InvalidCredentials);
    };
    verify_password(&req.password, stored_hash)?;

    let user_id = parse_user_id(&user)?;
    let tokens = state.sessions.issue(&state.db, user_id)?;
    info!("Login: {} ({})", user.username, user_id);

    let profile = UserProfile {
        id: user_id,
        username: user.username,
        email: user.email,
        verified: user.verified,
    };
    Ok((
        refresh_cookie_jar(jar, &tokens),
        Json(AuthResponse {
            access_token: tokens.access,
            user: profile,
            message: None,
        }),
    ))
}

/// Trades the cookie-borne refresh token for a fresh access token. The
/// cookie is left untouched: this flow never rotates the refresh token.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<AuthResponse>, ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(ApiError::SessionExpired("No refresh token provided"))?;

    let (access, user) = state.sessions.rotate(&state.db, &token)?;
    let user_id = parse_user_id(&user)?;

    Ok(Json(AuthResponse {
        access_token: access,
        user: UserProfile {
            id: user_id,
            username: user.username,
            email: user.email,
            verified: user.verified,
        },
        message: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .consume_verification_token(&query.token)?
        .ok_or_else(|| ApiError::Validation("Invalid or expired verification token".to_string()))?;

    info!("Email verified: {}", user.username);
    Ok(Json(serde_json::json!({ "message": "Email verified" })))
}

/// External identity yielded by an OAuth callback. The handshake itself is
/// not this crate's concern; callers hand over the provider's profile once
/// it has been established.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: String,
    pub display_name: String,
}

/// Logs an external identity in, provisioning the account on first sight.
/// Fresh accounts still go through email verification; issuance succeeds
/// either way and the profile carries the verified flag.
pub async fn external_login(
    state: &AppState,
    identity: ExternalIdentity,
) -> Result<(TokenPair, UserRow), ApiError> {
    let email = identity.email.trim().to_lowercase();

    if let Some(user) = state.db.get_user_by_external_id(&identity.external_id)? {
        let user_id = parse_user_id(&user)?;
        let tokens = state.sessions.issue(&state.db, user_id)?;
        return Ok((tokens, user));
    }

    let username: String = identity
        .display_name
        .split_whitespace()
        .collect::<String>()
        .to_lowercase();
    if username.is_empty() {
        return Err(ApiError::Validation(
            "External profile has no usable display name".to_string(),
        ));
    }
    if state
        .db
        .find_user_by_username_or_email(&username, &email)?
        .is_some()
    {
        return Err(ApiError::Validation(
            "Username or email already exists".to_string(),
        ));
    }

    let user_id = Uuid::new_v4();
    let verification_token = generate_verification_token();
    state.db.create_external_user(
        &user_id.to_string(),
        &username,
        &email,
        &identity.external_id,
        &verification_token,
    )?;
    state
        .mailer
        .send_verification(&email, &username, &verification_token);

    let tokens = state.sessions.issue(&state.db, user_id)?;
    info!("New external signup: {} ({})", username, user_id);

    let user = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("User missing right after creation"))?;
    Ok((tokens, user))
}

fn refresh_cookie_jar(jar: CookieJar, tokens: &TokenPair) -> CookieJar {
    let cookie = Cookie::build((REFRESH_COOKIE, tokens.refresh.clone()))
        .http_only(true)
        .path("/")
        .build();
    jar.add(cookie)
}

fn parse_user_id(user: &UserRow) -> Result<Uuid, ApiError> {
    user.id
        .parse()
        .map_err(|e| anyhow::anyhow!("Corrupt user id '{}': {}", user.id, e).into())
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    // Argon2id with per-user salt
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), ApiError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| anyhow::anyhow!("Corrupt password hash: {e}"))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::InvalidCredentials)
}

fn generate_verification_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}
