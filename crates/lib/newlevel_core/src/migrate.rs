//! Database migration support.
//!
//! Embeds the SQL migrations from `newlevel_core/migrations/`.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// Embedded migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run all pending migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Versions and descriptions of the embedded migrations, oldest first.
pub fn embedded() -> Vec<(i64, String)> {
    MIGRATOR
        .iter()
        .map(|m| (m.version, m.description.to_string()))
        .collect()
}
