//! Refresh-token generation, hashing and the store contract.
//!
//! Per account: `NONE -> ACTIVE -> {ROTATED | REVOKED | EXPIRED}`. A store
//! holds at most one live token per account; issuing a new one revokes the
//! previous one in the same atomic step.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{AuthError, StoreError};
use crate::models::auth::RefreshTokenRecord;
use crate::uuid::uuidv7_at;

/// Random bytes per refresh token (256 bits).
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random refresh token, base64url-encoded.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `now + ttl`, or `Internal` when that instant is out of range.
pub fn expiry_after(now: DateTime<Utc>, ttl: chrono::Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal(format!("expiry overflow: {now} + {ttl}")))
}

/// A freshly minted token: the plaintext for the caller, the record for the
/// store.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshTokenRecord,
}

impl IssuedRefreshToken {
    pub fn new(
        account_id: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Self, AuthError> {
        let expires_at = expiry_after(now, ttl)?;
        let token = generate_refresh_token();
        let record = RefreshTokenRecord {
            id: uuidv7_at(now),
            account_id,
            token_hash: hash_token(&token),
            created_at: now,
            expires_at,
            revoked_at: None,
        };
        Ok(Self { token, record })
    }
}

/// Persisted refresh tokens.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Revoke every live token of `record.account_id` and insert `record`,
    /// atomically with respect to other issuances for the same account.
    async fn replace_for_account(
        &self,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Look up a token that is unrevoked and unexpired at `now`. No mutation.
    async fn find_live(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Conditionally revoke a live token and return it. Of several concurrent
    /// callers with the same hash, at most one receives `Some`.
    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Revoke a token by hash. Returns the number of rows revoked.
    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Revoke all live tokens of an account. Returns the number of rows revoked.
    async fn revoke_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Number of unrevoked, unexpired tokens of an account.
    async fn count_live(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
