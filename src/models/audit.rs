use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Audit action names. Kept as string constants so the trail stays
/// greppable across releases.
pub mod actions {
    pub const LOGIN: &str = "LOGIN";
    pub const LOGOUT: &str = "LOGOUT";
    pub const LOGIN_FAILED: &str = "LOGIN_FAILED";
    pub const SESSION_CREATED: &str = "SESSION_CREATED";
    pub const SESSION_UPDATED: &str = "SESSION_UPDATED";
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    pub const SESSION_REVOKED: &str = "SESSION_REVOKED";
    pub const SESSION_CLEANUP: &str = "SESSION_CLEANUP";
    pub const AUDIT_CLEANUP: &str = "AUDIT_CLEANUP";
    pub const CONCURRENT_SESSION_DETECTED: &str = "CONCURRENT_SESSION_DETECTED";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const TWO_FACTOR_CHALLENGE: &str = "TWO_FACTOR_CHALLENGE";
    pub const USER_LOCKED: &str = "USER_LOCKED";
    pub const USER_UNLOCKED: &str = "USER_UNLOCKED";
}

/// Severity recorded alongside each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Information,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Information => "Information",
            AuditLevel::Warning => "Warning",
            AuditLevel::Error => "Error",
        }
    }
}

/// An append-only fact about a security-relevant action.
///
/// Immutable once written; the recorder only ever inserts and the
/// retention sweep only ever deletes whole rows past the horizon.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    /// Acting user id, or "System" for maintenance entries.
    pub user_id: String,
    pub user_name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub detail: Option<String>,
}

/// Builder-free record parameters for a new entry. The recorder fills
/// in id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub level: AuditLevel,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub detail: Option<String>,
}

impl NewAuditEntry {
    /// A successful user-scoped entry with the common fields filled in.
    pub fn success(action: &'static str, entity_type: &'static str, user_id: String, user_name: String) -> Self {
        NewAuditEntry {
            action,
            entity_type,
            entity_id: None,
            user_id,
            user_name,
            ip_address: None,
            user_agent: None,
            session_id: None,
            level: AuditLevel::Information,
            is_successful: true,
            error_message: None,
            detail: None,
        }
    }

    /// A failed entry at warning level.
    pub fn failure(action: &'static str, entity_type: &'static str, user_id: String, user_name: String, error: String) -> Self {
        NewAuditEntry {
            level: AuditLevel::Warning,
            is_successful: false,
            error_message: Some(error),
            ..NewAuditEntry::success(action, entity_type, user_id, user_name)
        }
    }

    /// A system-scoped entry (maintenance sweeps).
    pub fn system(action: &'static str, detail: String) -> Self {
        NewAuditEntry {
            entity_type: "System",
            ip_address: Some("internal".to_string()),
            detail: Some(detail),
            ..NewAuditEntry::success(action, "System", "System".to_string(), "System".to_string())
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }
}

/// Query filter for the audit list endpoints.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    /// Substring match on the action name.
    pub action_contains: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub skip: i64,
    pub take: i64,
}

impl AuditFilter {
    pub fn page(skip: i64, take: i64) -> Self {
        AuditFilter {
            skip: skip.max(0),
            take: take.clamp(1, 200),
            ..AuditFilter::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Postgres rejects negative OFFSET/LIMIT, so the page bounds are
    // sanitized before they reach SQL.
    #[test]
    fn page_bounds_are_sanitized() {
        let filter = AuditFilter::page(-5, -1);
        assert_eq!(filter.skip, 0);
        assert_eq!(filter.take, 1);

        let filter = AuditFilter::page(20, 10_000);
        assert_eq!(filter.skip, 20);
        assert_eq!(filter.take, 200);
    }
}
