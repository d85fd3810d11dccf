use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One authenticated device binding, as stored in the `sessions` table.
///
/// Revocation is terminal: a session is never deleted, it is flagged
/// revoked together with who did it and why.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque session id.
    pub id: Uuid,
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// High-entropy, URL-safe opaque token presented by the client.
    pub session_token: String,
    /// Client-supplied device identifier.
    pub device_id: String,
    /// Optional human-readable device name.
    pub device_name: Option<String>,
    /// User agent captured at login.
    pub user_agent: Option<String>,
    /// Origin IP captured at login.
    pub ip_address: Option<String>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
    /// Last time the session authorized a request.
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
}

impl Session {
    /// Whether the session is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The validity invariant: `active ∧ ¬revoked ∧ now < expires_at`.
    ///
    /// Always recomputed from the stored timestamps against the caller's
    /// UTC clock; never cached across a time boundary.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_revoked && !self.is_expired_at(now)
    }

    /// Ordering key for LRU eviction: last access, falling back to creation.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }
}

/// Client-facing session summary. Never exposes the session token.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub device_id: String,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        SessionInfo {
            id: s.id,
            device_id: s.device_id.clone(),
            device_name: s.device_name.clone(),
            ip_address: s.ip_address.clone(),
            created_at: s.created_at,
            expires_at: s.expires_at,
            last_accessed_at: s.last_accessed_at,
        }
    }
}

/// Per-user session statistics for the sessions overview endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatistics {
    pub active_sessions: i64,
    pub sessions_today: i64,
    pub unique_devices: i64,
    pub last_login: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_session(now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_token: "tok".to_string(),
            device_id: "dev-1".to_string(),
            device_name: None,
            user_agent: None,
            ip_address: None,
            created_at: now - Duration::hours(1),
            expires_at: now + Duration::hours(1),
            last_accessed_at: None,
            is_active: true,
            is_revoked: false,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        }
    }

    #[test]
    fn validity_requires_all_three_conditions() {
        let now = Utc::now();

        let valid = base_session(now);
        assert!(valid.is_valid_at(now));

        let mut inactive = base_session(now);
        inactive.is_active = false;
        assert!(!inactive.is_valid_at(now));

        let mut revoked = base_session(now);
        revoked.is_revoked = true;
        assert!(!revoked.is_valid_at(now));

        let mut expired = base_session(now);
        expired.expires_at = now - Duration::seconds(1);
        assert!(!expired.is_valid_at(now));

        // Expiry boundary is exclusive: exactly-at-expiry is no longer valid.
        let mut boundary = base_session(now);
        boundary.expires_at = now;
        assert!(!boundary.is_valid_at(now));
    }

    #[test]
    fn least_recently_used_orders_by_activity_then_creation() {
        let now = Utc::now();

        let mut idle = base_session(now);
        idle.created_at = now - Duration::hours(5);
        idle.last_accessed_at = Some(now - Duration::hours(4));

        let mut untouched = base_session(now);
        untouched.created_at = now - Duration::hours(3);

        let mut busy = base_session(now);
        busy.created_at = now - Duration::hours(6);
        busy.last_accessed_at = Some(now - Duration::minutes(1));

        let mut sessions = vec![busy.clone(), untouched.clone(), idle.clone()];
        sessions.sort_by_key(|s| s.last_activity());

        // The idle session is the eviction victim despite busy being older.
        assert_eq!(sessions[0].id, idle.id);
        assert_eq!(sessions[2].id, busy.id);
    }

    #[test]
    fn last_activity_falls_back_to_created_at() {
        let now = Utc::now();
        let mut s = base_session(now);
        assert_eq!(s.last_activity(), s.created_at);

        s.last_accessed_at = Some(now);
        assert_eq!(s.last_activity(), now);
    }
}
