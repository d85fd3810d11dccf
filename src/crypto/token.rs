use crate::error::{AppError, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

/// The size of a session token in bytes before encoding.
const SESSION_TOKEN_SIZE: usize = 32;

/// How long a two-factor challenge token may be presented back.
///
/// Independent of the 5-minute TTL on the code itself; both checks are
/// enforced, the stricter one wins in practice.
const CHALLENGE_TOKEN_MAX_AGE_MINUTES: i64 = 10;

/// Generates a new high-entropy, URL-safe session token.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_SIZE];
    OsRng.fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Encodes the opaque two-factor challenge token handed to the client
/// between the password step and the code step: `<user_id>:<issued_millis>`.
pub fn encode_challenge_token(user_id: Uuid, issued_at: DateTime<Utc>) -> String {
    let data = format!("{}:{}", user_id, issued_at.timestamp_millis());
    general_purpose::URL_SAFE_NO_PAD.encode(data.as_bytes())
}

/// Decodes a challenge token and enforces its 10-minute age window.
///
/// Any structural problem (bad base64, wrong shape, unparsable parts)
/// and any expired issuance both collapse into `ChallengeInvalid`; the
/// caller is not told which.
pub fn decode_challenge_token(token: &str, now: DateTime<Utc>) -> Result<Uuid> {
    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| AppError::ChallengeInvalid)?;
    let data = String::from_utf8(raw).map_err(|_| AppError::ChallengeInvalid)?;

    let mut parts = data.splitn(2, ':');
    let user_part = parts.next().ok_or(AppError::ChallengeInvalid)?;
    let ts_part = parts.next().ok_or(AppError::ChallengeInvalid)?;

    let user_id = Uuid::parse_str(user_part).map_err(|_| AppError::ChallengeInvalid)?;
    let millis: i64 = ts_part.parse().map_err(|_| AppError::ChallengeInvalid)?;
    let issued_at = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or(AppError::ChallengeInvalid)?;

    if now - issued_at > Duration::minutes(CHALLENGE_TOKEN_MAX_AGE_MINUTES) {
        return Err(AppError::ChallengeInvalid);
    }

    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_url_safe_and_distinct() {
        let a = generate_session_token();
        let b = generate_session_token();

        assert_ne!(a, b);
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn challenge_token_roundtrip() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let token = encode_challenge_token(user_id, now);
        let decoded = decode_challenge_token(&token, now).unwrap();

        assert_eq!(decoded, user_id);
    }

    #[test]
    fn challenge_token_expires_after_ten_minutes() {
        let user_id = Uuid::new_v4();
        let issued = Utc::now();
        let token = encode_challenge_token(user_id, issued);

        // Still valid right at the boundary.
        assert!(decode_challenge_token(&token, issued + Duration::minutes(10)).is_ok());
        // One second past the window is rejected.
        assert!(matches!(
            decode_challenge_token(&token, issued + Duration::minutes(10) + Duration::seconds(1)),
            Err(AppError::ChallengeInvalid)
        ));
    }

    #[test]
    fn malformed_challenge_tokens_are_rejected() {
        let now = Utc::now();

        for bad in [
            "not base64 !!",
            &general_purpose::URL_SAFE_NO_PAD.encode(b"no-separator"),
            &general_purpose::URL_SAFE_NO_PAD.encode(b"not-a-uuid:12345"),
            &general_purpose::URL_SAFE_NO_PAD
                .encode(format!("{}:not-a-number", Uuid::new_v4()).as_bytes()),
        ] {
            assert!(
                matches!(decode_challenge_token(bad, now), Err(AppError::ChallengeInvalid)),
                "expected rejection for {bad:?}"
            );
        }
    }
}
