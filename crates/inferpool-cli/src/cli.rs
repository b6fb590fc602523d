//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// inferpool — distributed inference dispatcher.
#[derive(Parser)]
#[command(name = "inferpool", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dispatcher HTTP server.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "0.0.0.0", env = "INFERPOOL_BIND")]
        bind: String,

        /// Port to listen on.
        #[arg(long, default_value_t = 8000, env = "INFERPOOL_PORT")]
        port: u16,

        /// Path to the SQLite database file.
        #[arg(long, default_value = "data/inferpool.db", env = "INFERPOOL_DB")]
        db: PathBuf,
    },

    /// Manage user accounts in the local database.
    Users {
        #[command(subcommand)]
        action: UserAction,

        /// Path to the SQLite database file.
        #[arg(long, default_value = "data/inferpool.db", env = "INFERPOOL_DB")]
        db: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum UserAction {
    /// Create a user (or update their display name) and print the credential.
    Add {
        telegram_id: i64,
        /// Display name; defaults to the id.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show a user's full record.
    Info { telegram_id: i64 },

    /// List all users, highest contribution first.
    List,

    /// Rotate a user's token and print the new credential.
    RefreshToken { telegram_id: i64 },

    /// Adjust a user's credit by a (possibly negative) amount.
    Credit { telegram_id: i64, amount: i64 },

    /// Permanently ban a user.
    Ban { telegram_id: i64 },

    /// Lift a permanent ban.
    Unban { telegram_id: i64 },
}
