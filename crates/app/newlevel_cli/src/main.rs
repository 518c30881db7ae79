// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use newlevel_core::auth::jwt::TokenSigner;
use newlevel_core::auth::queries::{PgBandDirectory, PgCredentialStore, PgRefreshTokenStore};
use newlevel_core::config::MIN_SECRET_BYTES;
use newlevel_core::notify::LogNotifier;
use newlevel_core::{AuthConfig, AuthService};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sqlx::PgPool;

mod cli;
mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let _logger = logging::init()?;

    if let Ok(path) = dotenvy::dotenv() {
        log::debug!("loaded environment from {}", path.display());
    }

    let args = Cli::parse();

    match args.command {
        Commands::Version => {
            println!(
                "{} {} (core {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                newlevel_core::version()
            );
        }
        Commands::GenSecret { length } => {
            if length < MIN_SECRET_BYTES {
                return Err(Error::Custom(format!(
                    "secret length must be at least {MIN_SECRET_BYTES}"
                )));
            }
            let secret: String = rng()
                .sample_iter(&Alphanumeric)
                .take(length)
                .map(char::from)
                .collect();
            println!("{secret}");
        }
        Commands::Migrate { database_url, list } => {
            if list {
                for (version, description) in newlevel_core::migrate::embedded() {
                    println!("{version:04} {description}");
                }
                return Ok(());
            }
            let pool = PgPool::connect(&database_url).await?;
            newlevel_core::migrate::migrate(&pool).await?;
            log::info!("migrations applied");
        }
        Commands::DecodeToken { token } => {
            let config = AuthConfig::from_env()?;
            let claims = TokenSigner::from_config(&config)
                .decode(&token)
                .map_err(|_| Error::Custom("token failed verification".into()))?;
            let expired = claims.is_expired(Utc::now());
            println!("{}", serde_json::to_string_pretty(&claims)?);
            if expired {
                log::warn!("token is expired");
            }
        }
        Commands::RevokeSessions {
            email,
            database_url,
        } => {
            let config = AuthConfig::from_env()?;
            let pool = PgPool::connect(&database_url).await?;
            let service = AuthService::new(
                config,
                Arc::new(PgCredentialStore::new(pool.clone())),
                Arc::new(PgRefreshTokenStore::new(pool.clone())),
                Arc::new(PgBandDirectory::new(pool)),
                Arc::new(LogNotifier),
            )?;
            let revoked = service.revoke_all_for_email(&email).await?;
            println!("revoked {revoked} refresh token(s)");
        }
    }

    Ok(())
}
