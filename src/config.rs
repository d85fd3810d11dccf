use anyhow::{Context, Result};
use std::env;

/// How clients are expected to present the session token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// Token in the `X-Session-Token` header only (APIs, mobile).
    Token,
    /// Http-only cookie only (browser clients).
    Cookie,
    /// Both transports accepted.
    Both,
}

impl AuthMethod {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "token" => Ok(AuthMethod::Token),
            "cookie" => Ok(AuthMethod::Cookie),
            "both" => Ok(AuthMethod::Both),
            other => anyhow::bail!("AUTH_METHOD must be token, cookie or both (got {other})"),
        }
    }

    /// Whether the session token should also travel in a cookie.
    pub fn uses_cookies(self) -> bool {
        matches!(self, AuthMethod::Cookie | AuthMethod::Both)
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Session token transport accepted from clients.
    pub auth_method: AuthMethod,
    /// Name of the session cookie when cookie mode is enabled.
    pub session_cookie_name: String,
    /// Whether the session cookie carries the Secure attribute.
    pub cookie_secure: bool,
    /// Minutes between expired-session sweeps.
    pub session_cleanup_interval_minutes: u64,
    /// Days of audit history kept by the retention sweep.
    pub audit_retention_days: i64,
    /// Master switch for the audit trail.
    pub audit_enabled: bool,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            auth_method: AuthMethod::parse(
                &env::var("AUTH_METHOD").unwrap_or_else(|_| "both".to_string()),
            )?,
            session_cookie_name: env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| "banking-session".to_string()),
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            session_cleanup_interval_minutes: env::var("SESSION_CLEANUP_INTERVAL_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid SESSION_CLEANUP_INTERVAL_MINUTES")?,
            audit_retention_days: env::var("AUDIT_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("Invalid AUDIT_RETENTION_DAYS")?,
            audit_enabled: env::var("AUDIT_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        })
    }
}
