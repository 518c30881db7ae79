//! Shared fixtures for the auth flow tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use newlevel_core::auth::memory::{
    MemoryBandDirectory, MemoryCredentialStore, MemoryRefreshTokenStore,
};
use newlevel_core::clock::ManualClock;
use newlevel_core::models::auth::{AuthResult, ProfileFields, RegisterOutcome};
use newlevel_core::notify::EmailNotifier;
use newlevel_core::{AuthConfig, AuthService, RegistrationPolicy};

pub const SECRET: &str = "test-secret-test-secret-test-secret!";
pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "Secret123!";

/// One captured email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Reset { to: String, token: String },
    Welcome { to: String, name: String },
    Confirmation { to: String, token: String },
}

/// Notifier that records everything and reports a configurable outcome.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn reset_tokens_for(&self, email: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Reset { to, token } if to == email => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reset tokens mailed to `email` once at least `n` background
    /// deliveries have landed.
    pub async fn await_reset_tokens(&self, email: &str, n: usize) -> Vec<String> {
        for _ in 0..200 {
            let tokens = self.reset_tokens_for(email);
            if tokens.len() >= n {
                return tokens;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("expected {n} reset email(s) to {email}");
    }

    pub async fn await_reset_token(&self, email: &str) -> String {
        self.await_reset_tokens(email, 1).await.pop().unwrap()
    }

    pub fn confirmation_token_for(&self, email: &str) -> Option<String> {
        self.sent.lock().unwrap().iter().rev().find_map(|s| match s {
            Sent::Confirmation { to, token } if to == email => Some(token.clone()),
            _ => None,
        })
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailNotifier for RecordingNotifier {
    async fn send_password_reset_email(&self, to: &str, token: &str, _base: &str) -> bool {
        self.sent.lock().unwrap().push(Sent::Reset {
            to: to.to_string(),
            token: token.to_string(),
        });
        !self.fail
    }

    async fn send_welcome_email(&self, to: &str, display_name: &str) -> bool {
        self.sent.lock().unwrap().push(Sent::Welcome {
            to: to.to_string(),
            name: display_name.to_string(),
        });
        !self.fail
    }

    async fn send_confirmation_email(&self, to: &str, token: &str, _base: &str) -> bool {
        self.sent.lock().unwrap().push(Sent::Confirmation {
            to: to.to_string(),
            token: token.to_string(),
        });
        !self.fail
    }
}

/// Service plus handles on everything behind it.
pub struct Harness {
    pub service: Arc<AuthService>,
    pub accounts: Arc<MemoryCredentialStore>,
    pub refresh_tokens: Arc<MemoryRefreshTokenStore>,
    pub bands: Arc<MemoryBandDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: ManualClock,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig::new(SECRET).unwrap();
    config.bcrypt_cost = 4;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config(), RecordingNotifier::default())
}

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn harness_with(config: AuthConfig, notifier: RecordingNotifier) -> Harness {
    init_tracing();
    let accounts = Arc::new(MemoryCredentialStore::new());
    let refresh_tokens = Arc::new(MemoryRefreshTokenStore::new());
    let bands = Arc::new(MemoryBandDirectory::new());
    let notifier = Arc::new(notifier);
    let clock = ManualClock::new(start_time());
    let service = AuthService::new(
        config,
        accounts.clone(),
        refresh_tokens.clone(),
        bands.clone(),
        notifier.clone(),
    )
    .unwrap()
    .with_clock(Arc::new(clock.clone()));
    Harness {
        service: Arc::new(service),
        accounts,
        refresh_tokens,
        bands,
        notifier,
        clock,
    }
}

pub fn confirmation_policy() -> AuthConfig {
    let mut config = test_config();
    config.registration_policy = RegistrationPolicy::RequireEmailConfirmation;
    config
}

pub fn profile(nickname: &str) -> ProfileFields {
    ProfileFields {
        nickname: Some(nickname.to_string()),
        ..ProfileFields::default()
    }
}

/// Register under the auto-login policy and return the session.
pub async fn register(h: &Harness, email: &str) -> AuthResult {
    match h
        .service
        .register(email, PASSWORD, profile("Tester"))
        .await
        .expect("register")
    {
        RegisterOutcome::Authenticated(result) => result,
        other => panic!("expected auto-login, got {other:?}"),
    }
}
