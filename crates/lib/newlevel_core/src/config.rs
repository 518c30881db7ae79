//! Auth core configuration.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;
use url::Url;

/// Minimum accepted signing-secret length in bytes (HS256 key size).
pub const MIN_SECRET_BYTES: usize = 32;

pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;
pub const DEFAULT_PASSWORD_RESET_TTL_HOURS: i64 = 1;
pub const DEFAULT_EMAIL_CONFIRMATION_TTL_HOURS: i64 = 24;
pub const DEFAULT_BCRYPT_COST: u32 = 10;

pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 24 * 60;
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;
pub const MAX_PASSWORD_RESET_TTL_HOURS: i64 = 7 * 24;
pub const MAX_EMAIL_CONFIRMATION_TTL_HOURS: i64 = 30 * 24;
pub const DEFAULT_ISSUER: &str = "newlevel";
pub const DEFAULT_RESET_URL_BASE: &str = "http://localhost:3000/reset-password";
pub const DEFAULT_CONFIRM_URL_BASE: &str = "http://localhost:3000/confirm-email";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("Signing secret must be at least {MIN_SECRET_BYTES} bytes")]
    WeakSecret,
}

/// What registration hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationPolicy {
    /// Account is created confirmed and logged in immediately.
    #[default]
    AutoLogin,
    /// Account is created unconfirmed; login is refused until the emailed
    /// confirmation token is redeemed.
    RequireEmailConfirmation,
}

impl FromStr for RegistrationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto-login" | "auto_login" => Ok(Self::AutoLogin),
            "require-email-confirmation" | "require_email_confirmation" => {
                Ok(Self::RequireEmailConfirmation)
            }
            other => Err(format!(
                "expected 'auto-login' or 'require-email-confirmation', got '{other}'"
            )),
        }
    }
}

/// Configuration for the auth core.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC-SHA256 signing key.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub email_confirmation_ttl: Duration,
    pub registration_policy: RegistrationPolicy,
    pub send_welcome_email: bool,
    /// Base URL the notifier appends the reset token to.
    pub reset_url_base: String,
    pub confirm_url_base: String,
    pub bcrypt_cost: u32,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("password_reset_ttl", &self.password_reset_ttl)
            .field("email_confirmation_ttl", &self.email_confirmation_ttl)
            .field("registration_policy", &self.registration_policy)
            .field("send_welcome_email", &self.send_welcome_email)
            .field("reset_url_base", &self.reset_url_base)
            .field("confirm_url_base", &self.confirm_url_base)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

impl AuthConfig {
    /// Config with defaults for everything but the secret.
    pub fn new(jwt_secret: impl Into<String>) -> Result<Self, ConfigError> {
        let jwt_secret = jwt_secret.into();
        if jwt_secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret);
        }
        Ok(Self {
            jwt_secret,
            jwt_issuer: DEFAULT_ISSUER.to_string(),
            access_token_ttl: Duration::minutes(DEFAULT_ACCESS_TOKEN_TTL_MINUTES),
            refresh_token_ttl: Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
            password_reset_ttl: Duration::hours(DEFAULT_PASSWORD_RESET_TTL_HOURS),
            email_confirmation_ttl: Duration::hours(DEFAULT_EMAIL_CONFIRMATION_TTL_HOURS),
            registration_policy: RegistrationPolicy::default(),
            send_welcome_email: true,
            reset_url_base: DEFAULT_RESET_URL_BASE.to_string(),
            confirm_url_base: DEFAULT_CONFIRM_URL_BASE.to_string(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        })
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                                  | Default                                  |
    /// |-------------------------------------------|------------------------------------------|
    /// | `NEWLEVEL_JWT_SECRET` / `JWT_SECRET`      | required, at least 32 bytes              |
    /// | `NEWLEVEL_JWT_ISSUER`                     | `newlevel`                               |
    /// | `NEWLEVEL_ACCESS_TOKEN_TTL_MINUTES`       | `15`                                     |
    /// | `NEWLEVEL_REFRESH_TOKEN_TTL_DAYS`         | `7`                                      |
    /// | `NEWLEVEL_PASSWORD_RESET_TTL_HOURS`       | `1`                                      |
    /// | `NEWLEVEL_EMAIL_CONFIRMATION_TTL_HOURS`   | `24`                                     |
    /// | `NEWLEVEL_REGISTRATION_POLICY`            | `auto-login`                             |
    /// | `NEWLEVEL_SEND_WELCOME_EMAIL`             | `true`                                   |
    /// | `NEWLEVEL_RESET_URL_BASE`                 | `http://localhost:3000/reset-password`   |
    /// | `NEWLEVEL_CONFIRM_URL_BASE`               | `http://localhost:3000/confirm-email`    |
    /// | `NEWLEVEL_BCRYPT_COST`                    | `10`                                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = get("NEWLEVEL_JWT_SECRET")
            .or_else(|| get("JWT_SECRET"))
            .ok_or(ConfigError::Missing("NEWLEVEL_JWT_SECRET"))?;
        let mut config = Self::new(secret)?;

        if let Some(issuer) = get("NEWLEVEL_JWT_ISSUER") {
            config.jwt_issuer = issuer;
        }
        if let Some(v) = get("NEWLEVEL_ACCESS_TOKEN_TTL_MINUTES") {
            config.access_token_ttl = parse_ttl(
                "NEWLEVEL_ACCESS_TOKEN_TTL_MINUTES",
                &v,
                MAX_ACCESS_TOKEN_TTL_MINUTES,
                Duration::try_minutes,
            )?;
        }
        if let Some(v) = get("NEWLEVEL_REFRESH_TOKEN_TTL_DAYS") {
            config.refresh_token_ttl = parse_ttl(
                "NEWLEVEL_REFRESH_TOKEN_TTL_DAYS",
                &v,
                MAX_REFRESH_TOKEN_TTL_DAYS,
                Duration::try_days,
            )?;
        }
        if let Some(v) = get("NEWLEVEL_PASSWORD_RESET_TTL_HOURS") {
            config.password_reset_ttl = parse_ttl(
                "NEWLEVEL_PASSWORD_RESET_TTL_HOURS",
                &v,
                MAX_PASSWORD_RESET_TTL_HOURS,
                Duration::try_hours,
            )?;
        }
        if let Some(v) = get("NEWLEVEL_EMAIL_CONFIRMATION_TTL_HOURS") {
            config.email_confirmation_ttl = parse_ttl(
                "NEWLEVEL_EMAIL_CONFIRMATION_TTL_HOURS",
                &v,
                MAX_EMAIL_CONFIRMATION_TTL_HOURS,
                Duration::try_hours,
            )?;
        }
        if let Some(v) = get("NEWLEVEL_REGISTRATION_POLICY") {
            config.registration_policy = v.parse().map_err(|reason| ConfigError::Invalid {
                var: "NEWLEVEL_REGISTRATION_POLICY",
                reason,
            })?;
        }
        if let Some(v) = get("NEWLEVEL_SEND_WELCOME_EMAIL") {
            config.send_welcome_email = parse_bool("NEWLEVEL_SEND_WELCOME_EMAIL", &v)?;
        }
        if let Some(v) = get("NEWLEVEL_RESET_URL_BASE") {
            config.reset_url_base = parse_url("NEWLEVEL_RESET_URL_BASE", v)?;
        }
        if let Some(v) = get("NEWLEVEL_CONFIRM_URL_BASE") {
            config.confirm_url_base = parse_url("NEWLEVEL_CONFIRM_URL_BASE", v)?;
        }
        if let Some(v) = get("NEWLEVEL_BCRYPT_COST") {
            let cost = v.trim().parse::<u32>().ok().filter(|c| (4..=31).contains(c));
            config.bcrypt_cost = cost.ok_or_else(|| ConfigError::Invalid {
                var: "NEWLEVEL_BCRYPT_COST",
                reason: format!("expected an integer between 4 and 31, got '{v}'"),
            })?;
        }
        Ok(config)
    }
}

/// A positive count of `unit`s no larger than `max`.
fn parse_ttl(
    var: &'static str,
    value: &str,
    max: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| (1..=max).contains(n))
        .and_then(unit)
        .ok_or_else(|| ConfigError::Invalid {
            var,
            reason: format!("expected an integer between 1 and {max}, got '{value}'"),
        })
}

fn parse_url(var: &'static str, value: String) -> Result<String, ConfigError> {
    match Url::parse(value.trim()) {
        Ok(url) if !url.cannot_be_a_base() => Ok(value.trim().to_string()),
        Ok(_) => Err(ConfigError::Invalid {
            var,
            reason: format!("'{value}' cannot carry query parameters"),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: format!("'{value}' is not an absolute URL: {e}"),
        }),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got '{value}'"),
        }),
    }
}
