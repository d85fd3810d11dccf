use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::{
        session::{Session, SessionInfo, SessionStatistics},
        user::User,
    },
    services::session as session_service,
    state::AppState,
    error::Result,
};

/// The request payload for extending the current session.
#[derive(Deserialize, Debug)]
pub struct ExtendSessionRequest {
    /// Minutes to add; zero (or omitted) applies the default extension.
    #[serde(default)]
    pub additional_minutes: i32,
}

/// The request payload for administrative revocation.
#[derive(Deserialize, Debug, Default)]
pub struct RevokeSessionRequest {
    pub reason: Option<String>,
}

/// The response payload for the sessions overview.
#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
    pub statistics: SessionStatistics,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub success: bool,
    pub revoked: u64,
}

/// Returns the calling session, token excluded.
#[axum::debug_handler]
pub async fn session_info(Extension(session): Extension<Session>) -> Response {
    (StatusCode::OK, Json(SessionInfo::from(&session))).into_response()
}

/// Lists the caller's valid sessions together with their statistics.
#[axum::debug_handler]
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Response> {
    let sessions = session_service::list_user_sessions(&state, &user.id).await?;
    let statistics = session_service::get_statistics(&state, &user.id).await?;

    let response = SessionListResponse {
        sessions: sessions.iter().map(SessionInfo::from).collect(),
        statistics,
    };
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Extends the calling session's expiry.
#[axum::debug_handler]
pub async fn extend_session(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<ExtendSessionRequest>,
) -> Result<Response> {
    tracing::info!(
        session_id = %session.id,
        additional_minutes = payload.additional_minutes,
        "⏱️ Session extension requested"
    );

    let extended = session_service::extend_session(
        &state,
        &session.session_token,
        payload.additional_minutes,
    )
    .await?;

    tracing::info!(session_id = %extended.id, expires_at = %extended.expires_at, "✅ Session extended");
    Ok((StatusCode::OK, Json(SessionInfo::from(&extended))).into_response())
}

/// Revokes one session by id. Admin only.
#[axum::debug_handler]
pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<RevokeSessionRequest>,
) -> Result<Response> {
    let reason = payload.reason.as_deref().unwrap_or("revoked by administrator");
    tracing::info!(%session_id, admin = %admin.username, reason, "🛑 Admin session revocation");

    session_service::revoke_session(&state, &session_id, &admin.username, reason).await?;

    Ok((StatusCode::OK, Json(RevokeResponse { success: true, revoked: 1 })).into_response())
}

/// Revokes every valid session of one user. Admin only.
#[axum::debug_handler]
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<RevokeSessionRequest>,
) -> Result<Response> {
    let reason = payload.reason.as_deref().unwrap_or("revoked by administrator");
    tracing::info!(%user_id, admin = %admin.username, reason, "🛑 Admin bulk revocation");

    let revoked =
        session_service::revoke_all_sessions_for_user(&state, &user_id, &admin.username, reason)
            .await?;

    Ok((StatusCode::OK, Json(RevokeResponse { success: true, revoked })).into_response())
}
