//! Authentication and token lifecycle.
//!
//! Password hashing, access-token signing, refresh-token rotation,
//! password-reset tokens and the `AuthService` that orchestrates them over
//! pluggable stores.

pub mod jwt;
pub mod memory;
pub mod password;
pub mod queries;
pub mod refresh;
pub mod reset;
pub mod roles;
pub mod service;
pub mod store;

use thiserror::Error;
use tracing::error;

/// Authentication errors crossing the boundary of the core.
///
/// Messages are deliberately generic: nothing here reveals whether an email
/// is registered.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Account already exists")]
    AlreadyExists,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// Access token failed structural or signature validation.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error")]
    Internal(String),
}

/// Convenience alias for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated")]
    Conflict,

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Maps unique violations to `Conflict`, leaving other database errors as-is.
    pub fn from_sqlx(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Db(e),
        }
    }
}

/// Every store failure is internal by default. A `Conflict` only means a
/// duplicate account where `create_account` maps it explicitly.
impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "auth store failure");
        AuthError::Internal(e.to_string())
    }
}
