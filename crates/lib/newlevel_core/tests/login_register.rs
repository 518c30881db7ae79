//! Login, registration and logout flows over the in-memory stores.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::*;
use newlevel_core::auth::memory::{MemoryBandDirectory, MemoryCredentialStore};
use newlevel_core::auth::refresh::RefreshTokenStore;
use newlevel_core::auth::store::CredentialStore;
use newlevel_core::models::auth::{
    BandMembership, ProfileFields, RefreshTokenRecord, RegisterOutcome, Role,
};
use newlevel_core::{AuthError, AuthService, StoreError};
use uuid::Uuid;

#[tokio::test]
async fn register_returns_usable_tokens() {
    let h = harness();
    let result = register(&h, EMAIL).await;

    assert!(!result.access_token.is_empty());
    assert!(!result.refresh_token.is_empty());
    assert_eq!(result.token_type, "Bearer");
    assert_eq!(result.profile.email, EMAIL);
    assert_eq!(result.profile.display_name, "Tester");
    assert_eq!(result.expires_at, start_time() + Duration::minutes(15));
    assert_eq!(result.refresh_expires_at, start_time() + Duration::days(7));

    let claims = h.service.authenticate(&result.access_token).unwrap();
    assert_eq!(claims.sub, result.profile.id.to_string());
    assert_eq!(claims.roles, vec![Role::User]);
}

#[tokio::test]
async fn register_sends_welcome_email() {
    let h = harness();
    register(&h, EMAIL).await;
    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![Sent::Welcome {
            to: EMAIL.into(),
            name: "Tester".into()
        }]
    );
}

#[tokio::test]
async fn welcome_email_can_be_disabled() {
    let mut config = test_config();
    config.send_welcome_email = false;
    let h = harness_with(config, RecordingNotifier::default());
    register(&h, EMAIL).await;
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn failed_welcome_email_does_not_undo_registration() {
    let h = harness_with(test_config(), RecordingNotifier::failing());
    register(&h, EMAIL).await;
    assert!(h.accounts.find_by_email(EMAIL).await.unwrap().is_some());
}

#[tokio::test]
async fn duplicate_registration_is_rejected_case_insensitively() {
    let h = harness();
    register(&h, EMAIL).await;
    let err = h
        .service
        .register("  USER@Example.com ", PASSWORD, ProfileFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AlreadyExists));
}

#[tokio::test]
async fn register_validates_input() {
    let h = harness();
    let err = h
        .service
        .register("not-an-email", PASSWORD, ProfileFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    let err = h
        .service
        .register(EMAIL, "short", ProfileFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn login_updates_last_login_and_keeps_intro_flag() {
    let h = harness();
    let registered = register(&h, EMAIL).await;
    h.accounts
        .set_skip_introduction(registered.profile.id, true)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(2));
    let result = h.service.login(EMAIL, PASSWORD).await.unwrap();
    assert!(result.profile.skip_introduction);

    let account = h.accounts.find_by_email(EMAIL).await.unwrap().unwrap();
    assert_eq!(account.last_login_at, Some(start_time() + Duration::hours(2)));
    assert!(account.skip_introduction);
}

#[tokio::test]
async fn login_is_case_insensitive_on_email() {
    let h = harness();
    register(&h, EMAIL).await;
    assert!(h.service.login("User@Example.COM", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn wrong_password_and_unknown_email_fail_identically() {
    let h = harness();
    register(&h, EMAIL).await;

    let wrong_password = h.service.login(EMAIL, "Wrong123!").await.unwrap_err();
    let unknown_email = h
        .service
        .login("nobody@example.com", PASSWORD)
        .await
        .unwrap_err();

    assert!(matches!(wrong_password, AuthError::Unauthorized));
    assert!(matches!(unknown_email, AuthError::Unauthorized));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn inactive_account_cannot_log_in() {
    let h = harness();
    let registered = register(&h, EMAIL).await;
    h.accounts
        .set_active(registered.profile.id, false)
        .await
        .unwrap();

    let err = h.service.login(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
}

#[tokio::test]
async fn second_login_leaves_exactly_one_live_refresh_token() {
    let h = harness();
    let registered = register(&h, EMAIL).await;
    let first = h.service.login(EMAIL, PASSWORD).await.unwrap();
    let second = h.service.login(EMAIL, PASSWORD).await.unwrap();

    let id = registered.profile.id;
    assert_eq!(h.refresh_tokens.count_live(id, start_time()).await.unwrap(), 1);
    assert!(!h.service.validate_refresh_token(&registered.refresh_token).await.unwrap());
    assert!(!h.service.validate_refresh_token(&first.refresh_token).await.unwrap());
    assert!(h.service.validate_refresh_token(&second.refresh_token).await.unwrap());
}

#[tokio::test]
async fn band_role_is_added_for_verified_band_admins() {
    let h = harness();
    let registered = register(&h, EMAIL).await;
    h.bands
        .add_membership(
            registered.profile.id,
            BandMembership {
                band_id: Uuid::now_v7(),
                is_admin: true,
                band_verified: true,
            },
        )
        .await;

    let result = h.service.login(EMAIL, PASSWORD).await.unwrap();
    let claims = h.service.authenticate(&result.access_token).unwrap();
    assert!(claims.has_role(Role::Band));
    assert!(claims.has_role(Role::User));
}

#[tokio::test]
async fn logout_blocks_refresh_but_not_issued_access_token() {
    let h = harness();
    let session = register(&h, EMAIL).await;

    h.service.logout(session.profile.id).await.unwrap();

    let err = h.service.refresh(&session.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert!(h.service.authenticate(&session.access_token).is_ok());

    // Logging out again is harmless.
    h.service.logout(session.profile.id).await.unwrap();
}

#[tokio::test]
async fn access_token_stops_authenticating_after_ttl() {
    let h = harness();
    let session = register(&h, EMAIL).await;
    h.clock.advance(Duration::minutes(15));
    assert!(matches!(
        h.service.authenticate(&session.access_token),
        Err(AuthError::Unauthorized)
    ));
    // Still decodable; only expiry fails.
    assert!(h.service.decode_token(&session.access_token).is_ok());
}

#[tokio::test]
async fn confirmation_policy_gates_login_until_confirmed() {
    let h = harness_with(confirmation_policy(), RecordingNotifier::default());
    let outcome = h
        .service
        .register(EMAIL, PASSWORD, profile("Pending"))
        .await
        .unwrap();
    let RegisterOutcome::ConfirmationRequired(profile) = outcome else {
        panic!("expected confirmation to be required");
    };
    assert_eq!(profile.email, EMAIL);

    assert!(matches!(
        h.service.login(EMAIL, PASSWORD).await,
        Err(AuthError::Unauthorized)
    ));

    let token = h.notifier.confirmation_token_for(EMAIL).unwrap();
    assert!(matches!(
        h.service.confirm_email(EMAIL, "wrong-token").await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
    h.service.confirm_email(EMAIL, &token).await.unwrap();
    assert!(h.service.login(EMAIL, PASSWORD).await.is_ok());

    // Confirmation tokens are single-use.
    assert!(matches!(
        h.service.confirm_email(EMAIL, &token).await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
}

#[tokio::test]
async fn confirmation_token_expires() {
    let h = harness_with(confirmation_policy(), RecordingNotifier::default());
    h.service
        .register(EMAIL, PASSWORD, ProfileFields::default())
        .await
        .unwrap();
    let token = h.notifier.confirmation_token_for(EMAIL).unwrap();

    h.clock.advance(Duration::hours(25));
    assert!(matches!(
        h.service.confirm_email(EMAIL, &token).await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
}

#[tokio::test]
#[allow(deprecated)]
async fn renew_reissues_access_token_without_rotation() {
    let h = harness();
    let session = register(&h, EMAIL).await;
    h.clock.advance(Duration::minutes(10));

    let renewed = h.service.renew_access_token(&session.access_token).await.unwrap();
    assert_eq!(renewed.expires_at, start_time() + Duration::minutes(25));
    assert!(h.service.validate_refresh_token(&session.refresh_token).await.unwrap());

    h.clock.advance(Duration::minutes(30));
    assert!(matches!(
        h.service.renew_access_token(&session.access_token).await,
        Err(AuthError::Unauthorized)
    ));
}

#[tokio::test]
async fn revoke_all_for_email_counts_revocations() {
    let h = harness();
    register(&h, EMAIL).await;
    assert_eq!(h.service.revoke_all_for_email(EMAIL).await.unwrap(), 1);
    assert_eq!(h.service.revoke_all_for_email(EMAIL).await.unwrap(), 0);
    assert_eq!(
        h.service
            .revoke_all_for_email("ghost@example.com")
            .await
            .unwrap(),
        0
    );
}

/// Refresh store whose inserts always hit a unique-constraint conflict.
struct ConflictingRefreshStore;

#[async_trait]
impl RefreshTokenStore for ConflictingRefreshStore {
    async fn replace_for_account(
        &self,
        _record: RefreshTokenRecord,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Conflict)
    }

    async fn find_live(
        &self,
        _token_hash: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(None)
    }

    async fn consume(
        &self,
        _token_hash: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(None)
    }

    async fn revoke(&self, _token_hash: &str, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn revoke_for_account(
        &self,
        _account_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn count_live(&self, _account_id: Uuid, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[tokio::test]
async fn refresh_store_conflict_is_an_internal_error() {
    let service = AuthService::new(
        test_config(),
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ConflictingRefreshStore),
        Arc::new(MemoryBandDirectory::new()),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    let err = service
        .register(EMAIL, PASSWORD, profile("Tester"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Internal(_)), "got {err:?}");

    let err = service.login(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::Internal(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_registrations_create_one_account() {
    let h = harness();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move {
            service.register(EMAIL, PASSWORD, profile("Racer")).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(AuthError::AlreadyExists) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(created, 1);
}
