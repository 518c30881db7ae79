//! Authentication domain models.
//!
//! Stored records (`Account`, `RefreshTokenRecord`) are distinct from what
//! crosses the boundary to callers (`AuthResult`, `UserProfile`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A role carried in access-token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
    /// Administrative member of a verified band. Computed, never stored.
    Band,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Admin => "Admin",
            Role::Band => "Band",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Role::User),
            "Admin" => Ok(Role::Admin),
            "Band" => Ok(Role::Band),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Stored account record, including the single-slot reset and confirmation
/// token fields.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    /// Normalised (trimmed, lowercase) email.
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub email_confirmed: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub skip_introduction: bool,
    /// Stored roles. `Role::Band` is never stored here.
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub confirmation_token_hash: Option<String>,
    pub confirmation_token_expires_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Nickname if set, otherwise "first last", otherwise the email.
    pub fn display_name(&self) -> String {
        if let Some(nick) = self.nickname.as_deref().filter(|n| !n.trim().is_empty()) {
            return nick.trim().to_string();
        }
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.email.clone()
        } else {
            full
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name(),
            skip_introduction: self.skip_introduction,
        }
    }
}

/// Fields for creating an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub email_confirmed: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nickname: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmation_token_hash: Option<String>,
    pub confirmation_token_expires_at: Option<DateTime<Utc>>,
}

/// Registration input beyond email and password.
#[derive(Debug, Clone, Default)]
pub struct ProfileFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nickname: Option<String>,
}

/// One band membership of an account, as needed for role computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandMembership {
    pub band_id: Uuid,
    pub is_admin: bool,
    pub band_verified: bool,
}

/// Refresh token record stored in the database. The plaintext token is never
/// stored, only its SHA-256 digest.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: account ID (standard JWT `sub` claim).
    pub sub: String,
    pub email: String,
    pub name: String,
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub iss: String,
    /// Token id.
    pub jti: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

impl AccessTokenClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn account_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Minimal profile returned alongside tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub skip_introduction: bool,
}

/// A freshly signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token pair plus profile handed back on login, refresh and auto-login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry.
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub token_type: String,
    pub profile: UserProfile,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    /// Auto-login policy: the account is usable immediately.
    Authenticated(AuthResult),
    /// Email-confirmation policy: login is refused until the emailed token is
    /// confirmed.
    ConfirmationRequired(UserProfile),
}
