use crate::{
    error::{AppError, Result},
    models::session::{Session, SessionStatistics},
};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, session_token, device_id, device_name, user_agent, \
ip_address, created_at, expires_at, last_accessed_at, is_active, is_revoked, revoked_at, \
revoked_by, revocation_reason";

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(row: &Row) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        user_id: row.try_get("user_id").map_err(|_| AppError::MissingData("user_id".to_string()))?,
        session_token: row.try_get("session_token").map_err(|_| AppError::MissingData("session_token".to_string()))?,
        device_id: row.try_get("device_id").map_err(|_| AppError::MissingData("device_id".to_string()))?,
        device_name: row.try_get("device_name").map_err(|_| AppError::MissingData("device_name".to_string()))?,
        user_agent: row.try_get("user_agent").map_err(|_| AppError::MissingData("user_agent".to_string()))?,
        ip_address: row.try_get("ip_address").map_err(|_| AppError::MissingData("ip_address".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        expires_at: row.try_get("expires_at").map_err(|_| AppError::MissingData("expires_at".to_string()))?,
        last_accessed_at: row.try_get("last_accessed_at").map_err(|_| AppError::MissingData("last_accessed_at".to_string()))?,
        is_active: row.try_get("is_active").map_err(|_| AppError::MissingData("is_active".to_string()))?,
        is_revoked: row.try_get("is_revoked").map_err(|_| AppError::MissingData("is_revoked".to_string()))?,
        revoked_at: row.try_get("revoked_at").map_err(|_| AppError::MissingData("revoked_at".to_string()))?,
        revoked_by: row.try_get("revoked_by").map_err(|_| AppError::MissingData("revoked_by".to_string()))?,
        revocation_reason: row.try_get("revocation_reason").map_err(|_| AppError::MissingData("revocation_reason".to_string()))?,
    })
}

/// Whether an error is the unique-key violation raised by a session
/// token collision, so the caller can regenerate and retry.
pub fn is_unique_violation(err: &AppError) -> bool {
    match err {
        AppError::Database(e) => e.code() == Some(&SqlState::UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Inserts a new session row. Fails with a unique violation on token
/// collision; the service layer owns the regenerate-and-retry policy.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &Pool,
    user_id: Uuid,
    session_token: &str,
    device_id: &str,
    device_name: Option<&str>,
    ip_address: &str,
    user_agent: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Session> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            &format!(
                r#"
                INSERT INTO sessions
                    (id, user_id, session_token, device_id, device_name, ip_address,
                     user_agent, created_at, expires_at, is_active, is_revoked)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, false)
                RETURNING {SESSION_COLUMNS}
                "#
            ),
            &[
                &Uuid::new_v4(),
                &user_id,
                &session_token,
                &device_id,
                &device_name,
                &ip_address,
                &user_agent,
                &now,
                &expires_at,
            ],
        )
        .await?;
    row_to_session(&row)
}

/// Finds a session by its token, in any state.
pub async fn find_by_token(pool: &Pool, session_token: &str) -> Result<Option<Session>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                r#"
                SELECT {SESSION_COLUMNS}
                FROM sessions
                WHERE session_token = $1
                "#
            ),
            &[&session_token],
        )
        .await?;
    row.map(|r| row_to_session(&r)).transpose()
}

/// Counts the user's currently-valid sessions.
pub async fn count_valid_for_user(pool: &Pool, user_id: &Uuid, now: DateTime<Utc>) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            SELECT COUNT(*) AS n
            FROM sessions
            WHERE user_id = $1 AND is_active AND NOT is_revoked AND expires_at > $2
            "#,
            &[user_id, &now],
        )
        .await?;
    Ok(row.try_get::<_, i64>("n").map_err(|_| AppError::MissingData("n".to_string()))?)
}

/// Lists the user's valid sessions, most recent activity first.
pub async fn list_valid_for_user(pool: &Pool, user_id: &Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            &format!(
                r#"
                SELECT {SESSION_COLUMNS}
                FROM sessions
                WHERE user_id = $1 AND is_active AND NOT is_revoked AND expires_at > $2
                ORDER BY COALESCE(last_accessed_at, created_at) DESC
                "#
            ),
            &[user_id, &now],
        )
        .await?;
    rows.iter().map(row_to_session).collect()
}

/// Revokes the user's least-recently-used valid session in one
/// statement, so two concurrent logins cannot both pick the same
/// victim and both skip it. Returns the evicted session id, if any.
pub async fn revoke_least_recently_used(
    pool: &Pool,
    user_id: &Uuid,
    revoked_by: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE sessions
            SET is_active = false,
                is_revoked = true,
                revoked_at = $4,
                revoked_by = $2,
                revocation_reason = $3
            WHERE id = (
                SELECT id
                FROM sessions
                WHERE user_id = $1 AND is_active AND NOT is_revoked AND expires_at > $4
                ORDER BY COALESCE(last_accessed_at, created_at) ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
            &[user_id, &revoked_by, &reason, &now],
        )
        .await?;
    Ok(row.map(|r| r.get::<_, Uuid>("id")))
}

/// Revokes one session by id. Returns the revoked row, or `None` when
/// the session does not exist or was already revoked.
pub async fn revoke_by_id(
    pool: &Pool,
    id: &Uuid,
    revoked_by: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<Session>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                r#"
                UPDATE sessions
                SET is_active = false,
                    is_revoked = true,
                    revoked_at = $4,
                    revoked_by = $2,
                    revocation_reason = $3
                WHERE id = $1 AND NOT is_revoked
                RETURNING {SESSION_COLUMNS}
                "#
            ),
            &[id, &revoked_by, &reason, &now],
        )
        .await?;
    row.map(|r| row_to_session(&r)).transpose()
}

/// Revokes a session by its token, only if still active. Returns the
/// revoked row for audit/notification purposes.
pub async fn revoke_by_token(
    pool: &Pool,
    session_token: &str,
    revoked_by: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<Session>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                r#"
                UPDATE sessions
                SET is_active = false,
                    is_revoked = true,
                    revoked_at = $4,
                    revoked_by = $2,
                    revocation_reason = $3
                WHERE session_token = $1 AND is_active AND NOT is_revoked
                RETURNING {SESSION_COLUMNS}
                "#
            ),
            &[&session_token, &revoked_by, &reason, &now],
        )
        .await?;
    row.map(|r| row_to_session(&r)).transpose()
}

/// Revokes every currently-valid session for a user in one unit.
/// Returns the number of sessions revoked.
pub async fn revoke_all_for_user(
    pool: &Pool,
    user_id: &Uuid,
    revoked_by: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE sessions
            SET is_active = false,
                is_revoked = true,
                revoked_at = $4,
                revoked_by = $2,
                revocation_reason = $3
            WHERE user_id = $1 AND is_active AND NOT is_revoked
            "#,
            &[user_id, &revoked_by, &reason, &now],
        )
        .await?;
    Ok(affected)
}

/// Revokes all active sessions bound to one of the user's devices.
pub async fn revoke_for_device(
    pool: &Pool,
    user_id: &Uuid,
    device_id: &str,
    revoked_by: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE sessions
            SET is_active = false,
                is_revoked = true,
                revoked_at = $5,
                revoked_by = $3,
                revocation_reason = $4
            WHERE user_id = $1 AND device_id = $2 AND is_active AND NOT is_revoked
            "#,
            &[user_id, &device_id, &revoked_by, &reason, &now],
        )
        .await?;
    Ok(affected)
}

/// Pushes a session's expiry forward by `minutes`, as a single
/// conditional update: validity and the 24-hour horizon are re-asserted
/// in the WHERE clause so a concurrent revocation or expiry cannot be
/// overwritten. Returns whether a row was updated.
pub async fn extend(
    pool: &Pool,
    session_token: &str,
    minutes: i32,
    now: DateTime<Utc>,
) -> Result<bool> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE sessions
            SET expires_at = expires_at + make_interval(mins => $2),
                last_accessed_at = $3
            WHERE session_token = $1
              AND is_active AND NOT is_revoked AND expires_at > $3
              AND expires_at + make_interval(mins => $2) <= $3 + INTERVAL '24 hours'
            "#,
            &[&session_token, &minutes, &now],
        )
        .await?;
    Ok(affected == 1)
}

/// Stamps `last_accessed_at` (and optionally a fresh IP) on a valid
/// session as it authorizes a request.
pub async fn touch(
    pool: &Pool,
    session_token: &str,
    ip_address: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            UPDATE sessions
            SET last_accessed_at = $3,
                ip_address = COALESCE($2, ip_address)
            WHERE session_token = $1 AND is_active AND NOT is_revoked AND expires_at > $3
            "#,
            &[&session_token, &ip_address, &now],
        )
        .await?;
    Ok(())
}

/// Bulk-revokes active sessions past their expiry. Idempotent; returns
/// how many sessions the sweep closed.
pub async fn sweep_expired(pool: &Pool, reason: &str, now: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE sessions
            SET is_active = false,
                is_revoked = true,
                revoked_at = $2,
                revoked_by = 'System',
                revocation_reason = $1
            WHERE is_active AND NOT is_revoked AND expires_at <= $2
            "#,
            &[&reason, &now],
        )
        .await?;
    Ok(affected)
}

/// Per-user session statistics in a single round trip.
pub async fn statistics_for_user(
    pool: &Pool,
    user_id: &Uuid,
    now: DateTime<Utc>,
) -> Result<SessionStatistics> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sessions
                 WHERE user_id = $1 AND is_active AND NOT is_revoked AND expires_at > $2) AS active_sessions,
                (SELECT COUNT(*) FROM sessions
                 WHERE user_id = $1 AND created_at >= date_trunc('day', $2)) AS sessions_today,
                (SELECT COUNT(DISTINCT device_id) FROM sessions
                 WHERE user_id = $1) AS unique_devices,
                (SELECT MAX(created_at) FROM sessions
                 WHERE user_id = $1) AS last_login
            "#,
            &[user_id, &now],
        )
        .await?;

    Ok(SessionStatistics {
        active_sessions: row.try_get("active_sessions").map_err(|_| AppError::MissingData("active_sessions".to_string()))?,
        sessions_today: row.try_get("sessions_today").map_err(|_| AppError::MissingData("sessions_today".to_string()))?,
        unique_devices: row.try_get("unique_devices").map_err(|_| AppError::MissingData("unique_devices".to_string()))?,
        last_login: row.try_get("last_login").map_err(|_| AppError::MissingData("last_login".to_string()))?,
    })
}
