//! # newlevel_core
//!
//! Authentication and token lifecycle core for NewLevel: credential checks,
//! access-token issuance, refresh-token rotation and password-reset tokens.

pub mod auth;
pub mod clock;
pub mod config;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod uuid;

pub use auth::service::AuthService;
pub use auth::{AuthError, StoreError};
pub use config::{AuthConfig, ConfigError, RegistrationPolicy};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
