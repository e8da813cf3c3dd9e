use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::ApiError;

/// Authenticated identity attached to requests that passed [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
}

/// Extract and validate the bearer access token, load the account, and
/// apply the verified-email gate. Issuance and refresh stay outside this
/// middleware: signing in while unverified is allowed, acting on protected
/// routes is not.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated("No token provided"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthenticated("No token provided"))?;

    let claims = state.sessions.verify_access(token)?;

    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::Unauthenticated("User not found"))?;
    if !user.verified {
        return Err(ApiError::EmailUnverified);
    }

    req.extensions_mut().insert(CurrentUser {
        id: claims.sub,
        username: user.username,
    });
    Ok(next.run(req).await)
}
