//! JWT access-token signing and decoding (HS256).

use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use super::AuthError;
use super::refresh::expiry_after;
use crate::config::AuthConfig;
use crate::models::auth::{AccessToken, AccessTokenClaims, Role};

/// Claim set supplied by the caller; the signer adds `iss`, `jti`, `iat`
/// and `exp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    pub account_id: Uuid,
    pub email: String,
    pub name: String,
    pub roles: Vec<Role>,
    pub avatar: Option<String>,
}

/// Stateless signer holding the HMAC key and access-token lifetime.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
            config.access_token_ttl,
        )
    }

    /// Sign `claims` with expiry `now + ttl`, truncated to the whole second
    /// that `exp` can carry.
    pub fn issue(&self, claims: &ClaimSet, now: DateTime<Utc>) -> Result<AccessToken, AuthError> {
        let expires_at = expiry_after(now, self.ttl)?.trunc_subsecs(0);
        let claims = AccessTokenClaims {
            sub: claims.account_id.to_string(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            roles: claims.roles.clone(),
            avatar: claims.avatar.clone(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(AccessToken { token, expires_at })
    }

    /// Parse and signature-check a token. Expiry is *not* enforced here;
    /// callers that need a currently usable token check
    /// [`AccessTokenClaims::is_expired`].
    pub fn decode(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        decode::<AccessTokenClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}
