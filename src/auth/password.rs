/// Password Hashing and Verification
///
/// bcrypt hashes with a configurable cost. Input length rules live here too,
/// because bcrypt silently ignores everything past 72 bytes.

use bcrypt::{hash, verify};

use crate::error::{AppError, ValidationError};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 72;

const DUMMY_PASSWORD: &str = "campus-hub-timing-equalizer";

/// Hash a password using bcrypt
///
/// # Errors
/// Returns error if the password fails the length rules or hashing fails
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    validate_password_length(password)?;

    hash(password, cost)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its hash
///
/// A mismatch is `Ok(false)`; only an unusable stored hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Hash that unknown-account logins are verified against
///
/// Must be built with the same cost as real account hashes, otherwise a miss
/// is measurably faster or slower than a hit.
pub fn dummy_hash(cost: u32) -> Result<String, AppError> {
    hash(DUMMY_PASSWORD, cost)
        .map_err(|e| AppError::Internal(format!("Dummy hash creation failed: {}", e)))
}

/// Burn one bcrypt verification for an unknown account
pub fn verify_against_dummy(password: &str, dummy: &str) {
    let _ = verify(password, dummy);
}

/// Length requirements: 8 to 72 bytes
pub fn validate_password_length(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::Validation(ValidationError::EmptyField(
            "password".to_string(),
        )));
    }

    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        )));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_password() {
        let password = "secret123";
        let hash = hash_password(password, TEST_COST).expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("secret123", TEST_COST).unwrap();
        assert!(verify_password("secret123", &hash).unwrap());
    }

    #[test]
    fn test_verify_wrong_password() {
        let hash = hash_password("secret123", TEST_COST).unwrap();
        assert!(!verify_password("secret124", &hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_an_error() {
        assert!(verify_password("secret123", "not-a-bcrypt-hash").is_err());
    }

    #[test]
    fn test_too_short_password() {
        assert!(hash_password("short1", TEST_COST).is_err());
    }

    #[test]
    fn test_too_long_password() {
        let long_password = "a".repeat(MAX_PASSWORD_LENGTH + 1);
        assert!(hash_password(&long_password, TEST_COST).is_err());
    }

    #[test]
    fn test_dummy_hash_uses_requested_cost() {
        let dummy = dummy_hash(TEST_COST).unwrap();
        assert_eq!(dummy.split('$').nth(2), Some("04"));

        // Never matches a real password, but still costs a full verification
        assert!(!verify_password("secret123", &dummy).unwrap());
        verify_against_dummy("secret123", &dummy);
    }

    #[test]
    fn test_dummy_hash_rejects_invalid_cost() {
        assert!(dummy_hash(2).is_err());
    }

    #[test]
    fn test_empty_password() {
        let err = validate_password_length("").unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::EmptyField(_))));
    }
}
