use crate::{
    crypto::token::{decode_challenge_token, encode_challenge_token},
    error::{AppError, Result},
    models::{
        audit::{actions, AuditLevel, NewAuditEntry},
        session::Session,
        user::User,
    },
    repositories::user as user_repo,
    services::session as session_service,
    state::AppState,
};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;

/// Ceiling on how long any collaborator (database, hasher, notifier)
/// may stall a login-path call. Fail closed: a hung dependency must
/// reject the attempt, not leave it pending.
const COLLABORATOR_TIMEOUT_SECS: u64 = 5;

async fn with_timeout<T, F>(what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(COLLABORATOR_TIMEOUT_SECS), fut)
        .await
        .map_err(|_| AppError::Timeout(what.to_string()))?
}

/// Notifier calls fail closed on a hang but a plain delivery error is
/// logged and swallowed, so an outage in the transport cannot take the
/// gate down with it.
async fn notify_two_factor(state: &AppState, user: &User, code: &str) -> Result<()> {
    match tokio::time::timeout(
        Duration::from_secs(COLLABORATOR_TIMEOUT_SECS),
        state.notifier.send_two_factor_code(user, code),
    )
    .await
    {
        Err(_) => Err(AppError::Timeout("two-factor delivery".to_string())),
        Ok(Err(err)) => {
            tracing::warn!(user_id = %user.id, error = %err, "Two-factor delivery failed");
            Ok(())
        }
        Ok(Ok(())) => Ok(()),
    }
}

/// What a successful password check leads to.
pub enum LoginOutcome {
    /// Credentials accepted, session established.
    Session { session: Session, user: User },
    /// Credentials accepted, but a two-factor code must be presented
    /// with this challenge token before a session is minted.
    TwoFactorRequired { challenge_token: String, user: User },
}

/// Context carried by every login-path call for audit and rate keys.
pub struct ClientContext<'a> {
    pub ip_address: &'a str,
    pub user_agent: &'a str,
}

async fn verify_password(state: &AppState, user: &User, password: &str) -> Result<bool> {
    let hasher = state.hasher.clone();
    let password = password.to_string();
    let hash = user.password_hash.clone();

    with_timeout("password verification", async move {
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Blocking task failed: {e}")))?
    })
    .await
}

async fn record_login_failure(state: &AppState, ctx: &ClientContext<'_>, email: &str, reason: &str) {
    state
        .audit
        .record(
            NewAuditEntry::failure(
                actions::LOGIN_FAILED,
                "Security",
                "Unknown".to_string(),
                email.to_string(),
                reason.to_string(),
            )
            .with_ip(ctx.ip_address)
            .with_user_agent(ctx.user_agent),
        )
        .await;
}

/// Password step of the login flow.
///
/// Rate limiting is keyed per source IP and email together, and every
/// attempt is recorded whether or not it succeeds. Only credential
/// failures feed the lockout counter; rate-limited and locked-out
/// rejections do not.
#[allow(clippy::too_many_arguments)]
pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    device_id: &str,
    device_name: Option<&str>,
    remember_me: bool,
    ctx: &ClientContext<'_>,
) -> Result<LoginOutcome> {
    let email = email.trim().to_ascii_lowercase();
    let rate_key = format!("{}:{}", ctx.ip_address, email);

    if !state.gate.check_rate_limit(&rate_key, "login") {
        let retry_after = state.gate.rate_limit_retry_after(&rate_key, "login");
        state
            .audit
            .record(
                NewAuditEntry::failure(
                    actions::RATE_LIMIT_EXCEEDED,
                    "Security",
                    "Unknown".to_string(),
                    email.clone(),
                    "Login rate limit exceeded".to_string(),
                )
                .with_ip(ctx.ip_address),
            )
            .await;
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    state.gate.record_attempt(&rate_key, "login");

    let user = with_timeout("user lookup", user_repo::find_by_email(&state.db, &email)).await?;
    let Some(user) = user else {
        record_login_failure(state, ctx, &email, "Unknown or inactive account").await;
        return Err(AppError::InvalidCredentials);
    };

    if state.gate.is_account_locked(user.id) {
        let remaining = state.gate.lockout_time_remaining(user.id);
        state
            .audit
            .record(
                NewAuditEntry::failure(
                    actions::LOGIN_FAILED,
                    "Security",
                    user.id.to_string(),
                    user.username.clone(),
                    "Account locked".to_string(),
                )
                .with_ip(ctx.ip_address),
            )
            .await;
        return Err(AppError::AccountLocked {
            remaining_minutes: remaining,
        });
    }

    if !verify_password(state, &user, password).await? {
        let failures = state.gate.increment_failed_login_attempts(user.id);
        record_login_failure(state, ctx, &email, "Invalid password").await;

        if state.gate.is_account_locked(user.id) {
            state
                .audit
                .record(
                    NewAuditEntry::failure(
                        actions::USER_LOCKED,
                        "Security",
                        user.id.to_string(),
                        user.username.clone(),
                        format!("Locked after {failures} failed attempts"),
                    )
                    .with_ip(ctx.ip_address)
                    .with_level(AuditLevel::Error),
                )
                .await;
        }
        return Err(AppError::InvalidCredentials);
    }

    state.gate.reset_failed_login_attempts(user.id);

    if user.two_factor_enabled && !state.gate.is_trusted_device(user.id, device_id) {
        let now = Utc::now();
        let code = state.gate.generate_two_factor_code(user.id);

        notify_two_factor(state, &user, &code).await?;

        state
            .audit
            .record(
                NewAuditEntry::success(
                    actions::TWO_FACTOR_CHALLENGE,
                    "Security",
                    user.id.to_string(),
                    user.username.clone(),
                )
                .with_ip(ctx.ip_address)
                .with_detail("Two-factor code issued"),
            )
            .await;

        return Ok(LoginOutcome::TwoFactorRequired {
            challenge_token: encode_challenge_token(user.id, now),
            user,
        });
    }

    let session = session_service::create_session(
        state,
        &user,
        device_id,
        device_name,
        ctx.ip_address,
        ctx.user_agent,
        remember_me,
    )
    .await?;

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::LOGIN,
                "Security",
                user.id.to_string(),
                user.username.clone(),
            )
            .with_ip(ctx.ip_address)
            .with_user_agent(ctx.user_agent)
            .with_session(session.id.to_string()),
        )
        .await;

    match tokio::time::timeout(
        Duration::from_secs(COLLABORATOR_TIMEOUT_SECS),
        state.notifier.send_login_notification(&user, &session),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(user_id = %user.id, error = %err, "Login notification failed");
        }
        Err(_) => {
            tracing::warn!(user_id = %user.id, "Login notification timed out");
        }
    }

    Ok(LoginOutcome::Session { session, user })
}

/// Code step of the login flow. Consumes the outstanding two-factor
/// code and mints the session.
#[allow(clippy::too_many_arguments)]
pub async fn verify_two_factor(
    state: &AppState,
    challenge_token: &str,
    code: &str,
    device_id: &str,
    device_name: Option<&str>,
    remember_me: bool,
    ctx: &ClientContext<'_>,
) -> Result<(Session, User)> {
    let now = Utc::now();
    let user_id = decode_challenge_token(challenge_token, now)?;

    let rate_key = format!("{}:{}", ctx.ip_address, user_id);
    if !state.gate.check_rate_limit(&rate_key, "two_factor") {
        let retry_after = state.gate.rate_limit_retry_after(&rate_key, "two_factor");
        state
            .audit
            .record(
                NewAuditEntry::failure(
                    actions::RATE_LIMIT_EXCEEDED,
                    "Security",
                    user_id.to_string(),
                    String::new(),
                    "Two-factor rate limit exceeded".to_string(),
                )
                .with_ip(ctx.ip_address),
            )
            .await;
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    state.gate.record_attempt(&rate_key, "two_factor");

    let user = with_timeout("user lookup", user_repo::find_by_id(&state.db, &user_id))
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::ChallengeInvalid)?;

    if !state.gate.validate_two_factor_code(user.id, code) {
        state
            .audit
            .record(
                NewAuditEntry::failure(
                    actions::TWO_FACTOR_CHALLENGE,
                    "Security",
                    user.id.to_string(),
                    user.username.clone(),
                    "Invalid or expired two-factor code".to_string(),
                )
                .with_ip(ctx.ip_address),
            )
            .await;
        return Err(AppError::ChallengeInvalid);
    }

    let session = session_service::create_session(
        state,
        &user,
        device_id,
        device_name,
        ctx.ip_address,
        ctx.user_agent,
        remember_me,
    )
    .await?;

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::LOGIN,
                "Security",
                user.id.to_string(),
                user.username.clone(),
            )
            .with_ip(ctx.ip_address)
            .with_user_agent(ctx.user_agent)
            .with_session(session.id.to_string())
            .with_detail("Two-factor login"),
        )
        .await;

    match tokio::time::timeout(
        Duration::from_secs(COLLABORATOR_TIMEOUT_SECS),
        state.notifier.send_login_notification(&user, &session),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(user_id = %user.id, error = %err, "Login notification failed");
        }
        Err(_) => {
            tracing::warn!(user_id = %user.id, "Login notification timed out");
        }
    }

    Ok((session, user))
}

/// Re-issues the outstanding two-factor code. The previous code stops
/// working; the returned challenge token replaces the old one.
pub async fn resend_two_factor(
    state: &AppState,
    challenge_token: &str,
    ctx: &ClientContext<'_>,
) -> Result<String> {
    let now = Utc::now();
    let user_id = decode_challenge_token(challenge_token, now)?;

    let rate_key = format!("{}:{}", ctx.ip_address, user_id);
    if !state.gate.check_rate_limit(&rate_key, "two_factor_resend") {
        let retry_after = state.gate.rate_limit_retry_after(&rate_key, "two_factor_resend");
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    state.gate.record_attempt(&rate_key, "two_factor_resend");

    let user = with_timeout("user lookup", user_repo::find_by_id(&state.db, &user_id))
        .await?
        .filter(|u| u.is_active && u.two_factor_enabled)
        .ok_or(AppError::ChallengeInvalid)?;

    let code = state.gate.generate_two_factor_code(user.id);
    notify_two_factor(state, &user, &code).await?;

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::TWO_FACTOR_CHALLENGE,
                "Security",
                user.id.to_string(),
                user.username.clone(),
            )
            .with_ip(ctx.ip_address)
            .with_detail("Two-factor code re-issued"),
        )
        .await;

    Ok(encode_challenge_token(user.id, now))
}

/// Ends the session behind the presented token. Unknown or already
/// closed tokens are not an error; logout is idempotent.
pub async fn logout(state: &AppState, session_token: &str, ctx: &ClientContext<'_>) -> Result<bool> {
    let now = Utc::now();
    let revoked = crate::repositories::session::revoke_by_token(
        &state.db,
        session_token,
        "User",
        "user logout",
        now,
    )
    .await?;

    let Some(session) = revoked else {
        return Ok(false);
    };

    state
        .audit
        .record(
            NewAuditEntry::success(
                actions::LOGOUT,
                "Security",
                session.user_id.to_string(),
                String::new(),
            )
            .with_ip(ctx.ip_address)
            .with_session(session.id.to_string()),
        )
        .await;

    tracing::info!(session_id = %session.id, "Logout");
    Ok(true)
}
