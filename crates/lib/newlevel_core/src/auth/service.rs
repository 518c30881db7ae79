//! Authentication service: login, registration, refresh, logout and
//! password-reset flows over pluggable stores.
//!
//! Every credential failure collapses to [`AuthError::Unauthorized`] and every
//! reset/confirmation failure to [`AuthError::InvalidOrExpiredToken`], so no
//! externally visible signal tells an unknown email apart from a wrong secret.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{ClaimSet, TokenSigner};
use super::password::{hash_password, validate_new_password};
use super::refresh::{IssuedRefreshToken, RefreshTokenStore, hash_token};
use super::reset::SlotToken;
use super::roles::compute_roles;
use super::store::{BandDirectory, CredentialStore, normalize_email};
use super::{AuthError, Result, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, RegistrationPolicy};
use crate::models::auth::{
    AccessToken, AccessTokenClaims, Account, AuthResult, NewAccount, ProfileFields,
    RegisterOutcome,
};
use crate::notify::EmailNotifier;
use crate::uuid::uuidv7_at;

/// Password hashed once at startup so that logins for unknown emails pay the
/// same bcrypt cost as real ones.
const TIMING_DUMMY_PASSWORD: &str = "newlevel-timing-equaliser";

/// Orchestrates the credential store, token stores, signer and notifier.
pub struct AuthService {
    accounts: Arc<dyn CredentialStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    bands: Arc<dyn BandDirectory>,
    notifier: Arc<dyn EmailNotifier>,
    clock: Arc<dyn Clock>,
    signer: TokenSigner,
    config: AuthConfig,
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        accounts: Arc<dyn CredentialStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        bands: Arc<dyn BandDirectory>,
        notifier: Arc<dyn EmailNotifier>,
    ) -> Result<Self> {
        let dummy_hash = hash_password(TIMING_DUMMY_PASSWORD, config.bcrypt_cost)?;
        Ok(Self {
            accounts,
            refresh_tokens,
            bands,
            notifier,
            clock: Arc::new(SystemClock),
            signer: TokenSigner::from_config(&config),
            config,
            dummy_hash,
        })
    }

    /// Replace the wall clock, e.g. with a `ManualClock` in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Access tokens
    // -----------------------------------------------------------------------

    /// Sign an access token for `claims`, expiring after the configured TTL.
    pub fn issue_access_token(&self, claims: &ClaimSet) -> Result<AccessToken> {
        self.signer.issue(claims, self.now())
    }

    /// Signature-check and decode without enforcing expiry.
    pub fn decode_token(&self, token: &str) -> Result<AccessTokenClaims> {
        self.signer.decode(token)
    }

    /// Claims of a token that is valid *and* unexpired right now.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessTokenClaims> {
        let claims = self
            .signer
            .decode(access_token)
            .map_err(|_| AuthError::Unauthorized)?;
        if claims.is_expired(self.now()) {
            return Err(AuthError::Unauthorized);
        }
        Ok(claims)
    }

    // -----------------------------------------------------------------------
    // Refresh tokens
    // -----------------------------------------------------------------------

    /// Mint a refresh token for an account, revoking any live one it had.
    pub async fn issue_refresh_token(&self, account_id: Uuid) -> Result<IssuedRefreshToken> {
        let now = self.now();
        let issued = IssuedRefreshToken::new(account_id, now, self.config.refresh_token_ttl)?;
        self.refresh_tokens
            .replace_for_account(issued.record.clone(), now)
            .await?;
        Ok(issued)
    }

    /// True iff the token exists, is unrevoked and unexpired. No mutation.
    pub async fn validate_refresh_token(&self, token: &str) -> Result<bool> {
        let live = self
            .refresh_tokens
            .find_live(&hash_token(token), self.now())
            .await?;
        Ok(live.is_some())
    }

    /// Rotate a refresh token: revoke it and issue a new pair with roles
    /// recomputed from the account's current state.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResult> {
        let now = self.now();

        // Conditional revoke; of concurrent callers only one gets the row.
        let Some(old) = self
            .refresh_tokens
            .consume(&hash_token(refresh_token), now)
            .await?
        else {
            debug!("refresh rejected: token unknown, revoked or expired");
            return Err(AuthError::Unauthorized);
        };

        let account = match self.accounts.find_by_id(old.account_id).await? {
            Some(a) if a.is_active => a,
            _ => {
                warn!(account_id = %old.account_id, "refresh for missing or inactive account");
                return Err(AuthError::Unauthorized);
            }
        };

        let result = self.issue_session(&account, now).await?;
        info!(account_id = %account.id, "refresh token rotated");
        Ok(result)
    }

    /// Revoke a single refresh token. Unknown or already revoked tokens are
    /// not an error.
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<()> {
        let revoked = self
            .refresh_tokens
            .revoke(&hash_token(refresh_token), self.now())
            .await?;
        debug!(revoked, "refresh token revocation");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Password reset
    // -----------------------------------------------------------------------

    /// Start a password reset. Reports success whether or not the email
    /// belongs to an active account; the email is delivered on a background
    /// task so the response does not wait on the notifier.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let account = match self.accounts.find_by_email(&email).await? {
            Some(a) if a.is_active => a,
            _ => {
                debug!("password reset requested for unknown or inactive account");
                return Ok(());
            }
        };

        let slot = SlotToken::generate(self.now(), self.config.password_reset_ttl)?;
        self.accounts
            .set_reset_token(account.id, &slot.token_hash, slot.expires_at)
            .await?;
        info!(account_id = %account.id, "password reset token issued");

        let notifier = Arc::clone(&self.notifier);
        let reset_url_base = self.config.reset_url_base.clone();
        tokio::spawn(async move {
            let sent = notifier
                .send_password_reset_email(&account.email, &slot.token, &reset_url_base)
                .await;
            if !sent {
                warn!(account_id = %account.id, "password reset email was not delivered");
            }
        });
        Ok(())
    }

    /// Redeem a reset token. On success the password changes, the token is
    /// cleared and the account's refresh tokens are revoked; no session is
    /// issued.
    pub async fn reset_password(&self, email: &str, token: &str, new_password: &str) -> Result<()> {
        validate_new_password(new_password)?;
        // Hashed before the lookup so unknown emails pay the same bcrypt cost.
        let new_hash = hash_password(new_password, self.config.bcrypt_cost)?;
        let email = normalize_email(email);
        let Some(account) = self.accounts.find_by_email(&email).await? else {
            return Err(AuthError::InvalidOrExpiredToken);
        };

        let now = self.now();
        let redeemed = self
            .accounts
            .redeem_reset_token(account.id, &hash_token(token), &new_hash, now)
            .await?;
        if !redeemed {
            debug!(account_id = %account.id, "reset token mismatch or expired");
            return Err(AuthError::InvalidOrExpiredToken);
        }

        self.refresh_tokens
            .revoke_for_account(account.id, now)
            .await?;
        info!(account_id = %account.id, "password reset completed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Login / registration / logout
    // -----------------------------------------------------------------------

    /// Authenticate with email + password.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResult> {
        let email = normalize_email(email);
        let account = self.accounts.find_by_email(&email).await?;

        // Unknown emails still pay for a bcrypt verification.
        let verified = match &account {
            Some(a) => self.accounts.verify_password(a, password)?,
            None => {
                super::password::verify_password(password, &self.dummy_hash)?;
                false
            }
        };

        let account = match account {
            Some(a) if verified && a.is_active && self.may_log_in(&a) => a,
            _ => {
                debug!("login rejected");
                return Err(AuthError::Unauthorized);
            }
        };

        let result = self.complete_login(&account).await?;
        info!(account_id = %account.id, "login succeeded");
        Ok(result)
    }

    /// Create an account. Under [`RegistrationPolicy::AutoLogin`] the new
    /// account is logged in immediately; under
    /// [`RegistrationPolicy::RequireEmailConfirmation`] a confirmation token is
    /// emailed instead.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        profile: ProfileFields,
    ) -> Result<RegisterOutcome> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("A valid email is required".into()));
        }
        validate_new_password(password)?;

        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(AuthError::AlreadyExists);
        }

        let now = self.now();
        let policy = self.config.registration_policy;
        let confirmation = match policy {
            RegistrationPolicy::AutoLogin => None,
            RegistrationPolicy::RequireEmailConfirmation => Some(SlotToken::generate(
                now,
                self.config.email_confirmation_ttl,
            )?),
        };

        let account = self
            .accounts
            .create_account(NewAccount {
                id: uuidv7_at(now),
                email,
                password_hash: hash_password(password, self.config.bcrypt_cost)?,
                email_confirmed: confirmation.is_none(),
                first_name: profile.first_name,
                last_name: profile.last_name,
                nickname: profile.nickname,
                created_at: now,
                confirmation_token_hash: confirmation.as_ref().map(|s| s.token_hash.clone()),
                confirmation_token_expires_at: confirmation.as_ref().map(|s| s.expires_at),
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict => AuthError::AlreadyExists,
                other => other.into(),
            })?;
        info!(account_id = %account.id, ?policy, "account registered");

        if self.config.send_welcome_email
            && !self
                .notifier
                .send_welcome_email(&account.email, &account.display_name())
                .await
        {
            warn!(account_id = %account.id, "welcome email was not delivered");
        }

        match confirmation {
            None => Ok(RegisterOutcome::Authenticated(
                self.complete_login(&account).await?,
            )),
            Some(slot) => {
                let sent = self
                    .notifier
                    .send_confirmation_email(
                        &account.email,
                        &slot.token,
                        &self.config.confirm_url_base,
                    )
                    .await;
                if !sent {
                    warn!(account_id = %account.id, "confirmation email was not delivered");
                }
                Ok(RegisterOutcome::ConfirmationRequired(account.profile()))
            }
        }
    }

    /// Redeem an email-confirmation token.
    pub async fn confirm_email(&self, email: &str, token: &str) -> Result<()> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.find_by_email(&email).await? else {
            return Err(AuthError::InvalidOrExpiredToken);
        };
        let confirmed = self
            .accounts
            .redeem_confirmation_token(account.id, &hash_token(token), self.now())
            .await?;
        if !confirmed {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        info!(account_id = %account.id, "email confirmed");
        Ok(())
    }

    /// Revoke the account's refresh tokens. Issued access tokens stay valid
    /// until they expire.
    pub async fn logout(&self, account_id: Uuid) -> Result<()> {
        let revoked = self
            .refresh_tokens
            .revoke_for_account(account_id, self.now())
            .await?;
        info!(%account_id, revoked, "logged out");
        Ok(())
    }

    /// Revoke every refresh token of the account registered under `email`.
    /// Returns how many were revoked; unknown emails revoke nothing.
    pub async fn revoke_all_for_email(&self, email: &str) -> Result<u64> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.find_by_email(&email).await? else {
            return Ok(0);
        };
        Ok(self
            .refresh_tokens
            .revoke_for_account(account.id, self.now())
            .await?)
    }

    /// Re-issue an access token from a still-valid one without touching
    /// refresh tokens.
    #[deprecated(note = "rotate with `AuthService::refresh` instead")]
    pub async fn renew_access_token(&self, access_token: &str) -> Result<AccessToken> {
        let claims = self.authenticate(access_token)?;
        let account_id = claims.account_id().ok_or(AuthError::Unauthorized)?;
        let account = match self.accounts.find_by_id(account_id).await? {
            Some(a) if a.is_active => a,
            _ => return Err(AuthError::Unauthorized),
        };
        let claims = self.claims_for(&account).await?;
        self.signer.issue(&claims, self.now())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn may_log_in(&self, account: &Account) -> bool {
        account.email_confirmed
            || self.config.registration_policy != RegistrationPolicy::RequireEmailConfirmation
    }

    async fn complete_login(&self, account: &Account) -> Result<AuthResult> {
        let now = self.now();
        self.accounts.update_last_login(account.id, now).await?;
        self.issue_session(account, now).await
    }

    async fn claims_for(&self, account: &Account) -> Result<ClaimSet> {
        let memberships = self.bands.memberships(account.id).await?;
        Ok(ClaimSet {
            account_id: account.id,
            email: account.email.clone(),
            name: account.display_name(),
            roles: compute_roles(account, &memberships),
            avatar: account.avatar_url.clone(),
        })
    }

    /// Fresh access token plus a refresh token that replaces any live one.
    async fn issue_session(&self, account: &Account, now: DateTime<Utc>) -> Result<AuthResult> {
        let claims = self.claims_for(account).await?;
        let access = self.signer.issue(&claims, now)?;
        let refresh = IssuedRefreshToken::new(account.id, now, self.config.refresh_token_ttl)?;
        let refresh_expires_at = refresh.record.expires_at;
        self.refresh_tokens
            .replace_for_account(refresh.record, now)
            .await?;

        Ok(AuthResult {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_at: access.expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
            profile: account.profile(),
        })
    }
}
