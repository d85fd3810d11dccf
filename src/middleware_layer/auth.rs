use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;
use tower_cookies::Cookies;

use crate::{
    config::AuthMethod,
    error::{AppError, Result},
    repositories::{session as session_repo, user as user_repo},
    state::AppState,
};

/// Header carrying the session token for API and mobile clients.
pub const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Extracts the session token from the configured transports: the
/// `X-Session-Token` header wins over the cookie when both are present.
fn extract_session_token(
    request: &Request<Body>,
    cookies: &Cookies,
    state: &AppState,
) -> Option<String> {
    if state.config.auth_method != AuthMethod::Cookie {
        if let Some(token) = request
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return Some(token.to_string());
        }
    }

    if state.config.auth_method.uses_cookies() {
        if let Some(cookie) = cookies.get(&state.config.session_cookie_name) {
            return Some(cookie.value().to_string());
        }
    }

    None
}

/// A middleware that requires a valid session to be present.
///
/// On success the request gains `Session` and `User` extensions and the
/// session's `last_accessed_at` is stamped.
pub async fn require_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    tracing::debug!("🔐 Checking session...");

    let token = extract_session_token(&request, &cookies, &state).ok_or_else(|| {
        tracing::warn!("❌ No session token presented");
        AppError::Unauthorized
    })?;

    let now = Utc::now();
    let session = session_repo::find_by_token(&state.db, &token)
        .await?
        .ok_or_else(|| {
            tracing::warn!("❌ Unknown session token");
            AppError::Unauthorized
        })?;

    // Validity is recomputed here on every request; the stored flags
    // alone are not trusted across the expiry boundary.
    if !session.is_valid_at(now) {
        tracing::warn!(session_id = %session.id, "❌ Session expired or revoked");
        return Err(AppError::SessionExpiredOrRevoked);
    }

    let user = user_repo::find_by_id(&state.db, &session.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| {
            tracing::warn!(session_id = %session.id, "❌ Session user missing or inactive");
            AppError::Unauthorized
        })?;

    // Best-effort activity stamp; authorization already succeeded.
    let ip = addr.ip().to_string();
    if let Err(err) = session_repo::touch(&state.db, &token, Some(&ip), now).await {
        tracing::warn!(session_id = %session.id, error = %err, "Failed to stamp session activity");
    }

    tracing::debug!(user_id = %user.id, session_id = %session.id, "✅ Session authorized");

    request.extensions_mut().insert(session);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// A middleware that requires the authenticated user to hold an admin
/// role. Must run after [`require_session`].
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response> {
    let user = request
        .extensions()
        .get::<crate::models::user::User>()
        .ok_or(AppError::Unauthorized)?;

    if !user.is_admin() {
        tracing::warn!(user_id = %user.id, "❌ Admin route refused");
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}
