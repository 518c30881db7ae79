//! Single-slot account tokens: password reset and email confirmation.
//!
//! Per account: `NONE -> PENDING -> {CONSUMED | EXPIRED | SUPERSEDED}`. The
//! slot lives on the account row, so writing a new token supersedes the old
//! one and clearing it on use prevents replay.

use chrono::{DateTime, Duration, Utc};
use url::Url;

use super::AuthError;
use super::refresh::{expiry_after, generate_refresh_token, hash_token};

/// A token ready to be written into an account slot and mailed out.
#[derive(Debug, Clone)]
pub struct SlotToken {
    /// Plaintext, handed only to the email notifier.
    pub token: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl SlotToken {
    pub fn generate(now: DateTime<Utc>, ttl: Duration) -> Result<Self, AuthError> {
        let expires_at = expiry_after(now, ttl)?;
        let token = generate_refresh_token();
        let token_hash = hash_token(&token);
        Ok(Self {
            token,
            token_hash,
            expires_at,
        })
    }
}

/// Whether a token hashing to `candidate_hash` redeems the stored slot at `now`.
pub fn slot_matches(
    stored_hash: Option<&str>,
    stored_expiry: Option<DateTime<Utc>>,
    candidate_hash: &str,
    now: DateTime<Utc>,
) -> bool {
    let (Some(stored_hash), Some(expires_at)) = (stored_hash, stored_expiry) else {
        return false;
    };
    if expires_at <= now {
        return false;
    }
    constant_time_eq(stored_hash.as_bytes(), candidate_hash.as_bytes())
}

/// Append `email` and `token` to a link base as query parameters, keeping any
/// query the base already has.
pub fn token_link(base: &str, email: &str, token: &str) -> Result<String, url::ParseError> {
    let mut link = Url::parse(base)?;
    link.query_pairs_mut()
        .append_pair("email", email)
        .append_pair("token", token);
    Ok(link.into())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
