use crate::{
    error::{AppError, Result},
    models::{
        audit::{actions, AuditLevel, NewAuditEntry},
        session::{Session, SessionStatistics},
        user::User,
    },
    repositories::{session as session_repo, user as user_repo},
    state::AppState,
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Hard cap on concurrently valid sessions per user.
const MAX_CONCURRENT_SESSIONS: i64 = 5;
/// Session lifetime with remember-me (30 days).
const REMEMBER_ME_TTL_MINUTES: i64 = 43_200;
/// Default session lifetime (8 hours).
const DEFAULT_TTL_MINUTES: i64 = 480;
/// Extension applied when the client asks for zero.
const DEFAULT_EXTENSION_MINUTES: i32 = 30;
/// Largest single extension step.
const MAX_EXTENSION_STEP_MINUTES: i32 = 480;
/// No extension may push expiry further than this past now.
const MAX_EXTENSION_HORIZON_HOURS: i64 = 24;

/// How many times a colliding session token is regenerated before
/// giving up. Collisions on 256-bit tokens mean something is badly
/// wrong with the RNG, not bad luck.
const TOKEN_RETRY_LIMIT: u32 = 3;

/// Resolves the requested extension step: zero means the 30-minute
/// default, negative and oversized steps are rejected.
fn resolve_extension_minutes(requested: i32) -> Result<i32> {
    let minutes = if requested == 0 {
        DEFAULT_EXTENSION_MINUTES
    } else {
        requested
    };

    if minutes < 0 {
        return Err(AppError::Validation(
            "Extension minutes must not be negative".to_string(),
        ));
    }
    if minutes > MAX_EXTENSION_STEP_MINUTES {
        return Err(AppError::Validation(format!(
            "Extension is capped at {MAX_EXTENSION_STEP_MINUTES} minutes per request"
        )));
    }
    Ok(minutes)
}

/// Whether extending `expires_at` by `minutes` stays inside the
/// 24-hour horizon from `now`.
fn extension_within_horizon(expires_at: DateTime<Utc>, minutes: i32, now: DateTime<Utc>) -> bool {
    expires_at + Duration::minutes(minutes as i64) <= now + Duration::hours(MAX_EXTENSION_HORIZON_HOURS)
}

/// Creates a session for an already-authenticated user, evicting the
/// least-recently-used session first when the user is at the
/// concurrency cap.
pub async fn create_session(
    state: &AppState,
    user: &User,
    device_id: &str,
    device_name: Option<&str>,
    ip_address: &str,
    user_agent: &str,
    remember_me: bool,
) -> Result<Session> {
    let now = Utc::now();

    // Eviction loop: normally removes at most one session, but also
    // drains any backlog left by a lowered cap.
    while session_repo::count_valid_for_user(&state.db, &user.id, now).await?
        >= MAX_CONCURRENT_SESSIONS
    {
        let evicted = session_repo::revoke_least_recently_used(
            &state.db,
            &user.id,
            "System",
            "concurrency limit reached",
            now,
        )
        .await?;

        let Some(evicted_id) = evicted else {
            break;
        };

        tracing::info!(user_id = %user.id, session_id = %evicted_id, "Evicted least-recently-used session");
        state
            .audit
            .record(
                NewAuditEntry::success(
                    actions::CONCURRENT_SESSION_DETECTED,
                    "Session",
                    user.id.to_string(),
                    user.username.clone(),
                )
                .with_entity(evicted_id.to_string())
                .with_ip(ip_address)
                .with_level(AuditLevel::Warning)
                .with_detail("Oldest session revoked to stay within the concurrent session limit"),
            )
            .await;
    }

    let ttl = if remember_me {
        REMEMBER_ME_TTL_MINUTES
    } else {
        DEFAULT_TTL_MINUTES
    };
    let expires_at = now + Duration::minutes(ttl);

    let mut attempt = 0;
    let session = loop {
        let token = crate::crypto::token::generate_session_token();
        match session_repo::insert(
            &state.db,
            user.id,
            &token,
            device_id,
            device_name,
            ip_address,
            user_agent,
            expires_at,
            now,
        )
        .await
        {
            Ok(session) => break session,
            Err(err) if session_repo::is_unique_violation(&err) && attempt < TOKEN_RETRY_LIMIT => {
                attempt += 1;
                tracing::warn!(user_id = %user.id, attempt, "Session token collision, regenerating");
            }
            Err(err) => return Err(err),
        }
    };

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::SESSION_CREATED,
                "Session",
                user.id.to_string(),
                user.username.clone(),
            )
            .with_entity(session.id.to_string())
            .with_ip(ip_address)
            .with_user_agent(user_agent)
            .with_session(session.id.to_string())
            .with_detail(format!("device_id={device_id}, remember_me={remember_me}")),
        )
        .await;

    tracing::info!(user_id = %user.id, session_id = %session.id, remember_me, "Session created");
    Ok(session)
}

/// Looks up a session by token and re-checks validity against the
/// current clock. Returns `None` for unknown, revoked or expired
/// sessions alike.
pub async fn validate_session(state: &AppState, session_token: &str) -> Result<Option<Session>> {
    let now = Utc::now();
    let session = session_repo::find_by_token(&state.db, session_token).await?;
    Ok(session.filter(|s| s.is_valid_at(now)))
}

/// Extends a valid session's expiry. The repository re-asserts validity
/// and the horizon inside the UPDATE, so a concurrent revocation loses.
pub async fn extend_session(
    state: &AppState,
    session_token: &str,
    additional_minutes: i32,
) -> Result<Session> {
    let now = Utc::now();
    let minutes = resolve_extension_minutes(additional_minutes)?;

    let session = session_repo::find_by_token(&state.db, session_token)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    if !session.is_valid_at(now) {
        tracing::warn!(
            session_id = %session.id,
            is_active = session.is_active,
            is_revoked = session.is_revoked,
            expires_at = %session.expires_at,
            "Extension refused on invalid session"
        );
        return Err(AppError::SessionExpiredOrRevoked);
    }

    if !extension_within_horizon(session.expires_at, minutes, now) {
        return Err(AppError::Validation(format!(
            "Extension would push expiry past the {MAX_EXTENSION_HORIZON_HOURS}-hour horizon"
        )));
    }

    if !session_repo::extend(&state.db, session_token, minutes, now).await? {
        // The session was valid a moment ago; a concurrent revocation
        // or sweep won the race.
        return Err(AppError::SessionExpiredOrRevoked);
    }

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::SESSION_UPDATED,
                "Session",
                session.user_id.to_string(),
                String::new(),
            )
            .with_entity(session.id.to_string())
            .with_session(session.id.to_string())
            .with_detail(format!("Extended by {minutes} minutes")),
        )
        .await;

    session_repo::find_by_token(&state.db, session_token)
        .await?
        .ok_or(AppError::SessionNotFound)
}

/// Revokes one session by id on behalf of `revoked_by`.
pub async fn revoke_session(
    state: &AppState,
    session_id: &Uuid,
    revoked_by: &str,
    reason: &str,
) -> Result<Session> {
    let now = Utc::now();
    let session = session_repo::revoke_by_id(&state.db, session_id, revoked_by, reason, now)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::SESSION_REVOKED,
                "Session",
                session.user_id.to_string(),
                String::new(),
            )
            .with_entity(session.id.to_string())
            .with_session(session.id.to_string())
            .with_detail(format!("Revoked by {revoked_by}: {reason}")),
        )
        .await;

    // Best-effort: the revocation already happened.
    if let Ok(Some(user)) = user_repo::find_by_id(&state.db, &session.user_id).await {
        if let Err(err) = state.notifier.send_session_revoked(&user, &session, reason).await {
            tracing::warn!(session_id = %session.id, error = %err, "Revocation notification failed");
        }
    }

    tracing::info!(session_id = %session.id, revoked_by, reason, "Session revoked");
    Ok(session)
}

/// Revokes every valid session for a user. Fails with `SessionNotFound`
/// when the user had nothing revocable.
pub async fn revoke_all_sessions_for_user(
    state: &AppState,
    user_id: &Uuid,
    revoked_by: &str,
    reason: &str,
) -> Result<u64> {
    let now = Utc::now();
    let revoked = session_repo::revoke_all_for_user(&state.db, user_id, revoked_by, reason, now).await?;

    if revoked == 0 {
        tracing::info!(%user_id, revoked_by, "Bulk revocation found no valid sessions");
        return Err(AppError::SessionNotFound);
    }

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::SESSION_REVOKED,
                "Session",
                user_id.to_string(),
                String::new(),
            )
            .with_detail(format!("Revoked {revoked} sessions by {revoked_by}: {reason}")),
        )
        .await;

    tracing::info!(%user_id, revoked, revoked_by, "Bulk session revocation");
    Ok(revoked)
}

/// Revokes every valid session bound to one of the user's devices.
pub async fn terminate_sessions_for_device(
    state: &AppState,
    user_id: &Uuid,
    device_id: &str,
    revoked_by: &str,
) -> Result<u64> {
    let now = Utc::now();
    let revoked = session_repo::revoke_for_device(
        &state.db,
        user_id,
        device_id,
        revoked_by,
        "device terminated",
        now,
    )
    .await?;

    if revoked > 0 {
        state
            .audit
            .record(
                NewAuditEntry::success(
                    actions::SESSION_REVOKED,
                    "Session",
                    user_id.to_string(),
                    String::new(),
                )
                .with_detail(format!("Terminated {revoked} sessions on device {device_id}")),
            )
            .await;
    }
    Ok(revoked)
}

/// The user's valid sessions, most recent activity first.
pub async fn list_user_sessions(state: &AppState, user_id: &Uuid) -> Result<Vec<Session>> {
    session_repo::list_valid_for_user(&state.db, user_id, Utc::now()).await
}

/// Count of the user's currently-valid sessions.
pub async fn get_active_session_count(state: &AppState, user_id: &Uuid) -> Result<i64> {
    session_repo::count_valid_for_user(&state.db, user_id, Utc::now()).await
}

/// Whether the user is at the concurrency cap.
pub async fn has_max_concurrent_sessions(state: &AppState, user_id: &Uuid) -> Result<bool> {
    Ok(get_active_session_count(state, user_id).await? >= MAX_CONCURRENT_SESSIONS)
}

/// Per-user session statistics.
pub async fn get_statistics(state: &AppState, user_id: &Uuid) -> Result<SessionStatistics> {
    session_repo::statistics_for_user(&state.db, user_id, Utc::now()).await
}

/// Sweeps sessions past their expiry. Run periodically from the
/// background loop; idempotent.
pub async fn cleanup_expired(state: &AppState) -> Result<u64> {
    let now = Utc::now();
    let swept = session_repo::sweep_expired(&state.db, "expired", now).await?;

    if swept > 0 {
        tracing::info!(swept, "Expired session sweep");
        state
            .audit
            .record(NewAuditEntry::system(
                actions::SESSION_CLEANUP,
                format!("Closed {swept} expired sessions"),
            ))
            .await;
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extension_defaults_to_thirty_minutes() {
        assert_eq!(resolve_extension_minutes(0).unwrap(), 30);
        assert_eq!(resolve_extension_minutes(15).unwrap(), 15);
    }

    #[test]
    fn extension_step_is_bounded() {
        assert_eq!(resolve_extension_minutes(480).unwrap(), 480);
        assert!(resolve_extension_minutes(481).is_err());
        assert!(resolve_extension_minutes(-5).is_err());
    }

    #[test]
    fn extension_horizon_is_twenty_four_hours_from_now() {
        let now = Utc::now();

        // Expiry an hour out: a full 480-minute step still fits.
        assert!(extension_within_horizon(now + Duration::hours(1), 480, now));

        // Expiry already 23.8 hours out: 30 minutes would overshoot.
        assert!(!extension_within_horizon(
            now + Duration::hours(23) + Duration::minutes(48),
            30,
            now
        ));

        // Landing exactly on the horizon is allowed.
        assert!(extension_within_horizon(now + Duration::hours(23), 60, now));
    }
}
