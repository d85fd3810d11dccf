use crate::error::{AppError, Result};

/// Validates an email address.
///
/// # Arguments
///
/// * `email` - The email address to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the email is valid.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(AppError::Validation("Email cannot be empty".to_string()));
    }

    if email.len() > 255 {
        return Err(AppError::Validation(
            "Email must be at most 255 characters".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AppError::Validation("Email is not valid".to_string()));
    };

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(AppError::Validation("Email is not valid".to_string()));
    }

    Ok(())
}

/// Validates a password.
///
/// # Arguments
///
/// * `password` - The password to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the password is valid.
pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }

    if password.len() > 128 {
        return Err(AppError::Validation(
            "Password must be at most 128 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a client-supplied device identifier.
///
/// # Arguments
///
/// * `device_id` - The device identifier to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the device identifier is valid.
pub fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() {
        return Err(AppError::Validation(
            "Device identifier cannot be empty".to_string(),
        ));
    }

    if device_id.len() > 100 {
        return Err(AppError::Validation(
            "Device identifier must be at most 100 characters".to_string(),
        ));
    }

    if !device_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AppError::Validation(
            "Device identifier can only contain letters, numbers, underscores, hyphens, and dots"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@nodot").is_err());
    }

    #[test]
    fn password_validation() {
        assert!(validate_password("long enough").is_ok());
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn device_id_validation() {
        assert!(validate_device_id("ios-app.v2_17").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id(&"d".repeat(101)).is_err());
        assert!(validate_device_id("bad id with spaces").is_err());
    }
}
