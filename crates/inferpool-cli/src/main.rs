//! CLI entry point for inferpool.
//!
//! Provides the `inferpool` command with two subcommands: `serve`, which
//! runs the dispatcher HTTP server, and `users`, which administers accounts
//! in the local database (normally driven by the chat-bot front-end, but
//! available here for operators).

mod cli;
mod helpers;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use tracing::info;

use inferpool_kernel::{DispatchConfig, Dispatcher, ModelRegistry};
use inferpool_store::{Database, UserStore};
use inferpool_web::{WebConfig, WebServer};

use crate::cli::{Cli, Commands, UserAction};
use crate::helpers::init_tracing;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing).
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, port, db } => cmd_serve(bind, port, db).await,
        Commands::Users { action, db } => cmd_users(action, db).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(bind: String, port: u16, db_path: std::path::PathBuf) -> Result<()> {
    init_tracing("info");

    info!(version = env!("CARGO_PKG_VERSION"), "starting inferpool");

    let users = open_store(&db_path).await?;

    // Daily counters restart with the process.
    let reset = users
        .reset_daily_usage()
        .await
        .context("failed to reset daily usage")?;
    info!(accounts = reset, "daily usage counters reset");

    let registry = ModelRegistry::builtin();
    info!(
        models = registry.specs().len(),
        default = registry.default_id(),
        "model registry loaded"
    );

    let dispatcher = Arc::new(Dispatcher::new(users, registry, DispatchConfig::default()));
    let server = WebServer::new(
        WebConfig {
            bind_addr: bind,
            port,
        },
        dispatcher,
    );

    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("web server failed: {e}"))
}

// ---------------------------------------------------------------------------
// Subcommand: users
// ---------------------------------------------------------------------------

async fn cmd_users(action: UserAction, db_path: std::path::PathBuf) -> Result<()> {
    init_tracing("warn");

    let users = open_store(&db_path).await?;

    match action {
        UserAction::Add { telegram_id, name } => {
            let token = users
                .create_or_update(telegram_id, name.as_deref())
                .await
                .context("failed to create user")?;
            println!("credential: {telegram_id}-{token}");
        }
        UserAction::Info { telegram_id } => match users.get(telegram_id).await? {
            Some(user) => {
                println!("id:            {}", user.telegram_id);
                println!("name:          {}", user.telegram_name);
                println!("credential:    {}-{}", user.telegram_id, user.token);
                println!("contribution:  {}", user.contribution);
                println!("credit:        {}", user.credit);
                println!("total usage:   {}", user.total_usage);
                println!("daily usage:   {}", user.daily_usage);
                println!("banned:        {}", user.is_banned);
                if user.temp_ban_until > Utc::now().timestamp() {
                    let until = Utc
                        .timestamp_opt(user.temp_ban_until, 0)
                        .single()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| user.temp_ban_until.to_string());
                    println!("temp ban:      until {until}");
                }
            }
            None => anyhow::bail!("user {telegram_id} not found"),
        },
        UserAction::List => {
            for user in users.list().await? {
                println!(
                    "{:>12}  {:<20} contribution={:<6} credit={:<6} usage={}/{}",
                    user.telegram_id,
                    user.telegram_name,
                    user.contribution,
                    user.credit,
                    user.daily_usage,
                    user.total_usage,
                );
            }
        }
        UserAction::RefreshToken { telegram_id } => {
            match users.refresh_token(telegram_id).await? {
                Some(token) => println!("credential: {telegram_id}-{token}"),
                None => anyhow::bail!("user {telegram_id} not found"),
            }
        }
        UserAction::Credit {
            telegram_id,
            amount,
        } => {
            if !users.add_credit(telegram_id, amount).await? {
                anyhow::bail!("user {telegram_id} not found");
            }
            println!("credit adjusted by {amount}");
        }
        UserAction::Ban { telegram_id } => {
            if !users.set_banned(telegram_id, true).await? {
                anyhow::bail!("user {telegram_id} not found");
            }
            println!("user {telegram_id} banned");
        }
        UserAction::Unban { telegram_id } => {
            if !users.set_banned(telegram_id, false).await? {
                anyhow::bail!("user {telegram_id} not found");
            }
            println!("user {telegram_id} unbanned");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_store(db_path: &Path) -> Result<UserStore> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let db = Database::open_and_migrate(db_path.to_path_buf())
        .await
        .context("failed to open database")?;
    Ok(UserStore::new(db))
}
