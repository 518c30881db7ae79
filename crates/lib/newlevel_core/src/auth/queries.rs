//! PostgreSQL implementations of the auth stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::StoreError;
use super::refresh::RefreshTokenStore;
use super::store::{BandDirectory, CredentialStore};
use crate::models::auth::{Account, BandMembership, NewAccount, RefreshTokenRecord, Role};

const ACCOUNT_COLUMNS: &str = "a.id, a.email, a.password_hash, a.is_active, a.email_confirmed, \
     a.first_name, a.last_name, a.nickname, a.avatar_url, a.skip_introduction, \
     a.created_at, a.last_login_at, a.reset_token_hash, a.reset_token_expires_at, \
     a.confirmation_token_hash, a.confirmation_token_expires_at, \
     COALESCE(array_agg(r.role) FILTER (WHERE r.role IS NOT NULL), '{}') AS roles";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    password_hash: String,
    is_active: bool,
    email_confirmed: bool,
    first_name: Option<String>,
    last_name: Option<String>,
    nickname: Option<String>,
    avatar_url: Option<String>,
    skip_introduction: bool,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
    reset_token_hash: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    confirmation_token_hash: Option<String>,
    confirmation_token_expires_at: Option<DateTime<Utc>>,
    roles: Vec<String>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        let roles = row
            .roles
            .iter()
            .filter_map(|r| match r.parse::<Role>() {
                Ok(role) => Some(role),
                Err(e) => {
                    warn!(account_id = %row.id, error = %e, "ignoring stored role");
                    None
                }
            })
            .collect();
        Account {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            is_active: row.is_active,
            email_confirmed: row.email_confirmed,
            first_name: row.first_name,
            last_name: row.last_name,
            nickname: row.nickname,
            avatar_url: row.avatar_url,
            skip_introduction: row.skip_introduction,
            roles,
            created_at: row.created_at,
            last_login_at: row.last_login_at,
            reset_token_hash: row.reset_token_hash,
            reset_token_expires_at: row.reset_token_expires_at,
            confirmation_token_hash: row.confirmation_token_hash,
            confirmation_token_expires_at: row.confirmation_token_expires_at,
        }
    }
}

/// Accounts in the `accounts` / `account_roles` tables.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts a \
             LEFT JOIN account_roles r ON r.account_id = a.id \
             WHERE lower(a.email) = lower($1) \
             GROUP BY a.id"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts a \
             LEFT JOIN account_roles r ON r.account_id = a.id \
             WHERE a.id = $1 \
             GROUP BY a.id"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO accounts (id, email, password_hash, email_confirmed, first_name, \
             last_name, nickname, created_at, confirmation_token_hash, \
             confirmation_token_expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(new.id)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.email_confirmed)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.nickname)
        .bind(new.created_at)
        .bind(&new.confirmation_token_hash)
        .bind(new.confirmation_token_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        sqlx::query("INSERT INTO account_roles (account_id, role) VALUES ($1, $2)")
            .bind(new.id)
            .bind(Role::User.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Account {
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
        })
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET reset_token_hash = $2, reset_token_expires_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn redeem_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts \
             SET password_hash = $3, reset_token_hash = NULL, reset_token_expires_at = NULL \
             WHERE id = $1 AND reset_token_hash = $2 AND reset_token_expires_at > $4",
        )
        .bind(id)
        .bind(token_hash)
        .bind(new_password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn redeem_confirmation_token(
        &self,
        id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts \
             SET email_confirmed = TRUE, confirmation_token_hash = NULL, \
                 confirmation_token_expires_at = NULL \
             WHERE id = $1 AND confirmation_token_hash = $2 \
               AND confirmation_token_expires_at > $3",
        )
        .bind(id)
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

type RefreshRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn refresh_record(
    (id, account_id, token_hash, created_at, expires_at, revoked_at): RefreshRow,
) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id,
        account_id,
        token_hash,
        created_at,
        expires_at,
        revoked_at,
    }
}

/// Refresh tokens in the `refresh_tokens` table.
#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn replace_for_account(
        &self,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialise issuance per account.
        sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(record.account_id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE account_id = $1 AND revoked_at IS NULL",
        )
        .bind(record.account_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO refresh_tokens (id, account_id, token_hash, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(&record.token_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_live(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            "SELECT id, account_id, token_hash, created_at, expires_at, revoked_at \
             FROM refresh_tokens \
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(refresh_record))
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2 \
             RETURNING id, account_id, token_hash, created_at, expires_at, revoked_at",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(refresh_record))
    }

    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE account_id = $1 AND revoked_at IS NULL",
        )
        .bind(account_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_live(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM refresh_tokens \
             WHERE account_id = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(account_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

/// Band memberships from `band_members` joined with `bands`.
#[derive(Debug, Clone)]
pub struct PgBandDirectory {
    pool: PgPool,
}

impl PgBandDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BandDirectory for PgBandDirectory {
    async fn memberships(&self, account_id: Uuid) -> Result<Vec<BandMembership>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, bool, bool)>(
            "SELECT bm.band_id, bm.is_admin, b.is_verified \
             FROM band_members bm \
             JOIN bands b ON b.id = bm.band_id \
             WHERE bm.account_id = $1",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(band_id, is_admin, band_verified)| BandMembership {
                band_id,
                is_admin,
                band_verified,
            })
            .collect())
    }
}
