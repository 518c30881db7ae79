use clap::{Parser, Subcommand};

/// Operator tooling for the NewLevel auth core.
#[derive(Debug, Parser)]
#[command(name = "newlevel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the version.
    Version,

    /// Print a random signing secret suitable for NEWLEVEL_JWT_SECRET.
    GenSecret {
        /// Secret length in characters (minimum 32).
        #[arg(long, default_value_t = 64)]
        length: usize,
    },

    /// Apply the embedded database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost:5432/newlevel")]
        database_url: String,

        /// Only list the embedded migrations.
        #[arg(long)]
        list: bool,
    },

    /// Verify an access token with the configured secret and print its claims.
    DecodeToken {
        token: String,
    },

    /// Revoke every refresh token of an account.
    RevokeSessions {
        email: String,

        #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost:5432/newlevel")]
        database_url: String,
    },
}
