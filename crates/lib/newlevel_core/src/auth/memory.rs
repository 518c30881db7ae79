//! In-memory stores.
//!
//! Each store keeps its state behind one async mutex, so every trait
//! operation (including the conditional ones) is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::StoreError;
use super::refresh::RefreshTokenStore;
use super::reset::slot_matches;
use super::store::{BandDirectory, CredentialStore};
use crate::models::auth::{Account, BandMembership, NewAccount, RefreshTokenRecord, Role};

/// Accounts keyed by id.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        self.modify(id, |a| a.is_active = active).await
    }

    pub async fn grant_role(&self, id: Uuid, role: Role) -> Result<(), StoreError> {
        self.modify(id, |a| {
            if !a.roles.contains(&role) {
                a.roles.push(role);
            }
        })
        .await
    }

    pub async fn set_skip_introduction(&self, id: Uuid, skip: bool) -> Result<(), StoreError> {
        self.modify(id, |a| a.skip_introduction = skip).await
    }

    async fn modify<F>(&self, id: Uuid, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Account) + Send,
    {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Unavailable(format!("no account {id}")))?;
        f(account);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.lock().await.get(&id).cloned())
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.lock().await;
        if accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(StoreError::Conflict);
        }
        let account = Account {
            id: new.id,
            email: new.email,
            password_hash: new.password_hash,
            is_active: true,
            email_confirmed: new.email_confirmed,
            first_name: new.first_name,
            last_name: new.last_name,
            nickname: new.nickname,
            avatar_url: None,
            skip_introduction: false,
            roles: vec![Role::User],
            created_at: new.created_at,
            last_login_at: None,
            reset_token_hash: None,
            reset_token_expires_at: None,
            confirmation_token_hash: new.confirmation_token_hash,
            confirmation_token_expires_at: new.confirmation_token_expires_at,
        };
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().await.get_mut(&id) {
            account.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().await.get_mut(&id) {
            account.reset_token_hash = Some(token_hash.to_string());
            account.reset_token_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn redeem_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        if !slot_matches(
            account.reset_token_hash.as_deref(),
            account.reset_token_expires_at,
            token_hash,
            now,
        ) {
            return Ok(false);
        }
        account.password_hash = new_password_hash.to_string();
        account.reset_token_hash = None;
        account.reset_token_expires_at = None;
        Ok(true)
    }

    async fn redeem_confirmation_token(
        &self,
        id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        if !slot_matches(
            account.confirmation_token_hash.as_deref(),
            account.confirmation_token_expires_at,
            token_hash,
            now,
        ) {
            return Ok(false);
        }
        account.email_confirmed = true;
        account.confirmation_token_hash = None;
        account.confirmation_token_expires_at = None;
        Ok(true)
    }
}

/// Refresh-token rows keyed by token hash.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    tokens: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of an account, revoked ones included.
    pub async fn records_for(&self, account_id: Uuid) -> Vec<RefreshTokenRecord> {
        let mut rows: Vec<_> = self
            .tokens
            .lock()
            .await
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn replace_for_account(
        &self,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tokens = self.tokens.lock().await;
        if tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict);
        }
        for existing in tokens.values_mut() {
            if existing.account_id == record.account_id && existing.revoked_at.is_none() {
                existing.revoked_at = Some(now);
            }
        }
        tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find_live(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let tokens = self.tokens.lock().await;
        Ok(tokens.get(token_hash).filter(|r| r.is_live(now)).cloned())
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let mut tokens = self.tokens.lock().await;
        match tokens.get_mut(token_hash) {
            Some(record) if record.is_live(now) => {
                record.revoked_at = Some(now);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = self.tokens.lock().await;
        match tokens.get_mut(token_hash) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(now);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn revoke_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tokens = self.tokens.lock().await;
        let mut revoked = 0;
        for record in tokens.values_mut() {
            if record.account_id == account_id && record.revoked_at.is_none() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn count_live(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let tokens = self.tokens.lock().await;
        Ok(tokens
            .values()
            .filter(|r| r.account_id == account_id && r.is_live(now))
            .count() as u64)
    }
}

/// Band memberships keyed by account.
#[derive(Debug, Default)]
pub struct MemoryBandDirectory {
    memberships: Mutex<HashMap<Uuid, Vec<BandMembership>>>,
}

impl MemoryBandDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_membership(&self, account_id: Uuid, membership: BandMembership) {
        self.memberships
            .lock()
            .await
            .entry(account_id)
            .or_default()
            .push(membership);
    }

    pub async fn clear(&self, account_id: Uuid) {
        self.memberships.lock().await.remove(&account_id);
    }
}

#[async_trait]
impl BandDirectory for MemoryBandDirectory {
    async fn memberships(&self, account_id: Uuid) -> Result<Vec<BandMembership>, StoreError> {
        Ok(self
            .memberships
            .lock()
            .await
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }
}
