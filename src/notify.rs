use crate::{
    error::Result,
    models::{session::Session, user::User},
};
use async_trait::async_trait;

/// Outbound user notification capability.
///
/// Injected at startup so the auth flow never commits to a transport.
/// Two-factor code delivery is the one call treated as load-bearing by
/// callers; the informational ones are best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a freshly issued two-factor code to the user.
    async fn send_two_factor_code(&self, user: &User, code: &str) -> Result<()>;

    /// Tells the user a new session was opened on their account.
    async fn send_login_notification(&self, user: &User, session: &Session) -> Result<()>;

    /// Tells the user one of their sessions was revoked.
    async fn send_session_revoked(&self, user: &User, session: &Session, reason: &str) -> Result<()>;
}

/// Log-backed notifier. Stands in until a mail transport is wired up;
/// codes land in the structured log at debug level only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_two_factor_code(&self, user: &User, code: &str) -> Result<()> {
        tracing::info!(user_id = %user.id, "Two-factor code issued");
        tracing::debug!(user_id = %user.id, code, "Two-factor code (log transport)");
        Ok(())
    }

    async fn send_login_notification(&self, user: &User, session: &Session) -> Result<()> {
        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            device_id = %session.device_id,
            "Login notification"
        );
        Ok(())
    }

    async fn send_session_revoked(&self, user: &User, session: &Session, reason: &str) -> Result<()> {
        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            reason,
            "Session revoked notification"
        );
        Ok(())
    }
}
