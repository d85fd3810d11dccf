use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::Result,
    models::{
        session::Session,
        user::{User, UserSummary},
    },
    services::auth::{self as auth_service, ClientContext, LoginOutcome},
    state::AppState,
    validation::auth::*,
};

/// The request payload for the password step of login.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: String,
    pub device_name: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
}

/// The request payload for the two-factor code step.
#[derive(Deserialize, Debug)]
pub struct VerifyTwoFactorRequest {
    pub challenge_token: String,
    pub code: String,
    pub device_id: String,
    pub device_name: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
}

/// The request payload for re-sending a two-factor code.
#[derive(Deserialize, Debug)]
pub struct ResendTwoFactorRequest {
    pub challenge_token: String,
}

/// The response payload for both login steps.
#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub requires_two_factor: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}

/// The response payload for logout and resend requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

fn user_agent_of(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Creates the http-only session cookie, expiring with the session.
fn create_session_cookie(state: &AppState, token: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
    let mut cookie = Cookie::new(state.config.session_cookie_name.clone(), token);

    cookie.set_http_only(true);
    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_path("/");

    if state.config.cookie_secure {
        cookie.set_secure(true);
    }

    let max_age_secs = (expires_at - Utc::now()).num_seconds().max(0);
    cookie.set_max_age(Duration::seconds(max_age_secs));

    cookie
}

/// Builds the session half of a login response, honoring the configured
/// token transport: in cookie mode the token travels only in the
/// cookie, never in the body.
fn session_response(
    state: &AppState,
    cookies: &Cookies,
    session: &Session,
    user: &User,
) -> LoginResponse {
    let uses_cookies = state.config.auth_method.uses_cookies();
    if uses_cookies {
        cookies.add(create_session_cookie(
            state,
            session.session_token.clone(),
            session.expires_at,
        ));
        tracing::debug!(session_id = %session.id, "✅ Session cookie added");
    }

    let token_in_body = match state.config.auth_method {
        crate::config::AuthMethod::Cookie => None,
        _ => Some(session.session_token.clone()),
    };

    LoginResponse {
        success: true,
        requires_two_factor: false,
        challenge_token: None,
        session_token: token_in_body,
        expires_at: Some(session.expires_at),
        user: Some(UserSummary::from(user)),
    }
}

/// Handles the password step of login.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!(email = %payload.email, device_id = %payload.device_id, "🔐 Login attempt");
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    validate_device_id(&payload.device_id)?;

    let ip = addr.ip().to_string();
    let user_agent = user_agent_of(&headers);
    let ctx = ClientContext {
        ip_address: &ip,
        user_agent: &user_agent,
    };

    let outcome = auth_service::login(
        &state,
        &payload.email,
        &payload.password,
        &payload.device_id,
        payload.device_name.as_deref(),
        payload.remember_me,
        &ctx,
    )
    .await?;

    let response = match outcome {
        LoginOutcome::Session { session, user } => {
            tracing::info!(user_id = %user.id, "✅ Login complete");
            session_response(&state, &cookies, &session, &user)
        }
        LoginOutcome::TwoFactorRequired { challenge_token, user } => {
            tracing::info!(user_id = %user.id, "🔐 Two-factor challenge issued");
            LoginResponse {
                success: true,
                requires_two_factor: true,
                challenge_token: Some(challenge_token),
                session_token: None,
                expires_at: None,
                user: None,
            }
        }
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles the two-factor code step of login.
#[axum::debug_handler]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    cookies: Cookies,
    Json(payload): Json<VerifyTwoFactorRequest>,
) -> Result<Response> {
    tracing::info!(device_id = %payload.device_id, "🔐 Two-factor verification attempt");
    validate_device_id(&payload.device_id)?;

    let ip = addr.ip().to_string();
    let user_agent = user_agent_of(&headers);
    let ctx = ClientContext {
        ip_address: &ip,
        user_agent: &user_agent,
    };

    let (session, user) = auth_service::verify_two_factor(
        &state,
        &payload.challenge_token,
        &payload.code,
        &payload.device_id,
        payload.device_name.as_deref(),
        payload.remember_me,
        &ctx,
    )
    .await?;

    tracing::info!(user_id = %user.id, "✅ Two-factor login complete");
    let response = session_response(&state, &cookies, &session, &user);
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles re-sending the two-factor code.
#[axum::debug_handler]
pub async fn resend_two_factor(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ResendTwoFactorRequest>,
) -> Result<Response> {
    let ip = addr.ip().to_string();
    let user_agent = user_agent_of(&headers);
    let ctx = ClientContext {
        ip_address: &ip,
        user_agent: &user_agent,
    };

    let challenge_token =
        auth_service::resend_two_factor(&state, &payload.challenge_token, &ctx).await?;

    tracing::info!("✅ Two-factor code re-sent");
    let response = LoginResponse {
        success: true,
        requires_two_factor: true,
        challenge_token: Some(challenge_token),
        session_token: None,
        expires_at: None,
        user: None,
    };
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    tracing::info!(user_id = %session.user_id, "👋 Logout");

    let ip = addr.ip().to_string();
    let user_agent = user_agent_of(&headers);
    let ctx = ClientContext {
        ip_address: &ip,
        user_agent: &user_agent,
    };

    auth_service::logout(&state, &session.session_token, &ctx).await?;

    if state.config.auth_method.uses_cookies() {
        let mut cookie = Cookie::new(state.config.session_cookie_name.clone(), "");
        cookie.set_max_age(Duration::seconds(0));
        cookie.set_path("/");
        cookies.remove(cookie);
    }

    tracing::info!(user_id = %session.user_id, "✅ User logged out");
    let response = AuthResponse {
        success: true,
        message: "Logout successful".to_string(),
    };
    Ok((StatusCode::OK, Json(response)).into_response())
}
