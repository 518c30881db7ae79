//! Password hashing via bcrypt.
//!
//! `bcrypt::verify` compares digests in constant time; plaintext passwords are
//! never compared directly.

use super::AuthError;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password with bcrypt at the given cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// Reject passwords that are too short to be accepted on register or reset.
pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
