//! Store contracts consumed by `AuthService`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AuthError, StoreError, password};
use crate::models::auth::{Account, BandMembership, NewAccount};

/// Trim and lowercase an email for lookup and uniqueness.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accounts and their credential fields. Emails passed in are already
/// normalised with [`normalize_email`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Overwrite the reset slot; any previous token stops working.
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// If the reset slot holds `token_hash` unexpired at `now`, set the new
    /// password hash and clear the slot in one step. Returns whether it did.
    async fn redeem_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// If the confirmation slot holds `token_hash` unexpired at `now`, mark the
    /// email confirmed and clear the slot. Returns whether it did.
    async fn redeem_confirmation_token(
        &self,
        id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Constant-time check of `plaintext` against the stored hash.
    fn verify_password(&self, account: &Account, plaintext: &str) -> Result<bool, AuthError> {
        password::verify_password(plaintext, &account.password_hash)
    }
}

/// Band membership lookups for role computation.
#[async_trait]
pub trait BandDirectory: Send + Sync {
    async fn memberships(&self, account_id: Uuid) -> Result<Vec<BandMembership>, StoreError>;
}
