use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A pool construction error.
    #[error("Pool build error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A credential failure. Deliberately does not say which check failed.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account is temporarily locked after repeated failures.
    #[error("Account locked for {remaining_minutes} more minutes")]
    AccountLocked {
        /// Minutes until the lockout window ends.
        remaining_minutes: i64,
    },

    /// Too many attempts inside the sliding window.
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds until the oldest attempt ages out of the window.
        retry_after_secs: i64,
    },

    /// A bad or expired two-factor token or code.
    #[error("Invalid or expired verification challenge")]
    ChallengeInvalid,

    /// No session matches the presented identifier.
    #[error("Session not found")]
    SessionNotFound,

    /// The session exists but is no longer usable.
    #[error("Session expired or revoked")]
    SessionExpiredOrRevoked,

    /// An authentication error (missing or unusable session token).
    #[error("Authentication required")]
    Unauthorized,

    /// An authorization error (role check failed).
    #[error("Authorization failed")]
    Forbidden,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A row was missing an expected column.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A collaborator did not answer inside its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A cryptographic primitive failure.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Pool build error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::InvalidCredentials => {
                tracing::warn!("Authentication failed: invalid credentials");
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }

            AppError::AccountLocked { remaining_minutes } => {
                tracing::warn!("Authentication refused: account locked for {} minutes", remaining_minutes);
                (
                    StatusCode::LOCKED,
                    format!("Account locked. Try again in {} minutes", remaining_minutes),
                )
            }

            AppError::RateLimited { retry_after_secs } => {
                tracing::warn!("Rate limit exceeded, retry in {}s", retry_after_secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    format!("Too many attempts. Try again in {} seconds", retry_after_secs),
                )
            }

            AppError::ChallengeInvalid => {
                tracing::warn!("Two-factor challenge rejected");
                (StatusCode::UNAUTHORIZED, "Invalid or expired verification code".to_string())
            }

            AppError::SessionNotFound => {
                tracing::debug!("Session not found");
                (StatusCode::NOT_FOUND, "Session not found".to_string())
            }

            AppError::SessionExpiredOrRevoked => {
                tracing::debug!("Session expired or revoked");
                (StatusCode::UNAUTHORIZED, "Session expired or revoked".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authentication required");
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }

            AppError::Forbidden => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::MissingData(ref col) => {
                tracing::error!("Missing column in row: {}", col);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Timeout(ref what) => {
                tracing::error!("Timed out waiting for {}", what);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::Crypto(ref msg) => {
                tracing::error!("Crypto error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    // A failed two-factor code must not be reported as a generic
    // credential failure: both are 401, but the bodies differ.
    #[tokio::test]
    async fn challenge_rejection_is_distinct_from_credential_rejection() {
        let challenge = AppError::ChallengeInvalid.into_response();
        let credentials = AppError::InvalidCredentials.into_response();

        assert_eq!(challenge.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(credentials.status(), StatusCode::UNAUTHORIZED);

        let challenge_body = to_bytes(challenge.into_body(), 1024).await.unwrap();
        let credentials_body = to_bytes(credentials.into_body(), 1024).await.unwrap();

        assert_eq!(
            &challenge_body[..],
            br#"{"error":"Invalid or expired verification code"}"#
        );
        assert_ne!(challenge_body, credentials_body);
    }

    #[tokio::test]
    async fn retryable_rejections_disclose_their_wait() {
        let locked = AppError::AccountLocked { remaining_minutes: 12 }.into_response();
        assert_eq!(locked.status(), StatusCode::LOCKED);
        let body = to_bytes(locked.into_body(), 1024).await.unwrap();
        assert!(std::str::from_utf8(&body).unwrap().contains("12 minutes"));

        let limited = AppError::RateLimited { retry_after_secs: 30 }.into_response();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = to_bytes(limited.into_body(), 1024).await.unwrap();
        assert!(std::str::from_utf8(&body).unwrap().contains("30 seconds"));
    }
}
