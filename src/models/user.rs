use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A user row, looked up at the authentication boundary.
///
/// User management (creation, role assignment) lives elsewhere; this
/// service only reads what the security gate needs.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    /// Credential hash in PHC string format.
    pub password_hash: String,
    pub roles: Vec<String>,
    pub two_factor_enabled: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the user carries an administrative role.
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "Admin" || r == "SuperAdmin")
    }
}

/// Minimal user summary returned in login responses.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        UserSummary {
            id: u.id,
            email: u.email.clone(),
            username: u.username.clone(),
            full_name: u.full_name.clone(),
        }
    }
}
