//! User and credential persistence for inferpool.
//!
//! Every requester and compute provider is a row in the `users` table,
//! keyed by their Telegram id and authenticated by an opaque token. The
//! dispatcher consumes [`UserStore::validate`], [`UserStore::get_credit`]
//! and [`UserStore::set_temp_ban`]; the remaining operations exist for the
//! account-management front-end (token provisioning, leaderboard counters,
//! permanent bans).

use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A user account, covering both requesters and compute providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Telegram id — the stable identity and primary key.
    pub telegram_id: i64,
    /// Display name shown in leaderboards.
    pub telegram_name: String,
    /// Opaque secret; the second half of the `{id}-{token}` credential.
    pub token: String,
    /// Completed jobs submitted as a compute provider.
    pub contribution: i64,
    /// Spendable priority credit; copied onto tasks at enqueue time.
    pub credit: i64,
    /// Lifetime completed requests.
    pub total_usage: i64,
    /// Completed requests since the last daily reset.
    pub daily_usage: i64,
    /// Permanent ban flag.
    pub is_banned: bool,
    /// Epoch seconds until which the account is temporarily denied; 0 when
    /// no temp ban is active.
    pub temp_ban_until: i64,
}

/// Length of generated account tokens.
const TOKEN_LEN: usize = 12;

/// Alphanumeric alphabet for token generation.
const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random alphanumeric token.
fn generate_token() -> StoreResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; TOKEN_LEN];
    rng.fill(&mut bytes)
        .map_err(|_| StoreError::InvalidArgument("failed to generate random token".into()))?;

    Ok(bytes
        .iter()
        .map(|b| TOKEN_CHARS[*b as usize % TOKEN_CHARS.len()] as char)
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════
//  UserStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD operations on user accounts.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    /// Create a new user store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user with a freshly generated token, or update the display
    /// name of an existing one. Returns the account token either way.
    #[instrument(skip(self))]
    pub async fn create_or_update(
        &self,
        telegram_id: i64,
        telegram_name: Option<&str>,
    ) -> StoreResult<String> {
        let name = telegram_name.map(|s| s.to_string());
        let new_token = generate_token()?;

        let token = self
            .db
            .with_conn(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT token FROM users WHERE telegram_id = ?1",
                        rusqlite::params![telegram_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(StoreError::Sqlite(other)),
                    })?;

                match existing {
                    Some(token) => {
                        if let Some(name) = name {
                            conn.execute(
                                "UPDATE users SET telegram_name = ?1 WHERE telegram_id = ?2",
                                rusqlite::params![name, telegram_id],
                            )?;
                        }
                        Ok(token)
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO users (telegram_id, telegram_name, token) \
                             VALUES (?1, ?2, ?3)",
                            rusqlite::params![
                                telegram_id,
                                name.unwrap_or_else(|| telegram_id.to_string()),
                                new_token
                            ],
                        )?;
                        Ok(new_token)
                    }
                }
            })
            .await?;

        debug!(telegram_id, "user created or updated");
        Ok(token)
    }

    /// Replace the user's token with a fresh one.
    ///
    /// Returns `None` if the user does not exist.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self, telegram_id: i64) -> StoreResult<Option<String>> {
        let token = generate_token()?;
        let stored = token.clone();
        let updated = self
            .db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET token = ?1 WHERE telegram_id = ?2",
                    rusqlite::params![stored, telegram_id],
                )?;
                Ok(n > 0)
            })
            .await?;

        Ok(updated.then_some(token))
    }

    /// Check a credential against the store.
    ///
    /// Valid iff the user exists, is not permanently banned, any temp ban
    /// has expired, and the secret matches the stored token.
    #[instrument(skip(self, secret))]
    pub async fn validate(&self, telegram_id: i64, secret: &str) -> StoreResult<bool> {
        let secret = secret.to_string();
        let now = Utc::now().timestamp();
        self.db
            .with_conn(move |conn| {
                let row: Option<(String, bool, i64)> = conn
                    .query_row(
                        "SELECT token, is_banned, temp_ban_until FROM users \
                         WHERE telegram_id = ?1",
                        rusqlite::params![telegram_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(StoreError::Sqlite(other)),
                    })?;

                Ok(match row {
                    Some((token, is_banned, temp_ban_until)) => {
                        !is_banned && now >= temp_ban_until && token == secret
                    }
                    None => false,
                })
            })
            .await
    }

    /// Read a user's credit. Missing users report 0.
    #[instrument(skip(self))]
    pub async fn get_credit(&self, telegram_id: i64) -> StoreResult<i64> {
        self.db
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT credit FROM users WHERE telegram_id = ?1",
                    rusqlite::params![telegram_id],
                    |row| row.get(0),
                )
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(0),
                    other => Err(StoreError::Sqlite(other)),
                })
            })
            .await
    }

    /// Deny the user's credential until `until_epoch` (seconds).
    ///
    /// Returns `false` if the user does not exist.
    #[instrument(skip(self))]
    pub async fn set_temp_ban(&self, telegram_id: i64, until_epoch: i64) -> StoreResult<bool> {
        let updated = self
            .db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET temp_ban_until = ?1 WHERE telegram_id = ?2",
                    rusqlite::params![until_epoch, telegram_id],
                )?;
                Ok(n > 0)
            })
            .await?;

        if updated {
            debug!(telegram_id, until_epoch, "temp ban set");
        }
        Ok(updated)
    }

    /// Set or clear the permanent ban flag.
    #[instrument(skip(self))]
    pub async fn set_banned(&self, telegram_id: i64, banned: bool) -> StoreResult<bool> {
        self.db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET is_banned = ?1 WHERE telegram_id = ?2",
                    rusqlite::params![banned, telegram_id],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Adjust the user's credit by `amount` (may be negative).
    #[instrument(skip(self))]
    pub async fn add_credit(&self, telegram_id: i64, amount: i64) -> StoreResult<bool> {
        self.db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET credit = credit + ?1 WHERE telegram_id = ?2",
                    rusqlite::params![amount, telegram_id],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Bump the user's contribution counter by `amount`.
    #[instrument(skip(self))]
    pub async fn add_contribution(&self, telegram_id: i64, amount: i64) -> StoreResult<bool> {
        self.db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET contribution = contribution + ?1 WHERE telegram_id = ?2",
                    rusqlite::params![amount, telegram_id],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Record one completed request: bumps both the lifetime and the daily
    /// usage counters.
    #[instrument(skip(self))]
    pub async fn record_usage(&self, telegram_id: i64) -> StoreResult<bool> {
        self.db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET total_usage = total_usage + 1, \
                     daily_usage = daily_usage + 1 WHERE telegram_id = ?1",
                    rusqlite::params![telegram_id],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Zero the daily usage counter for every account. Run at startup.
    #[instrument(skip(self))]
    pub async fn reset_daily_usage(&self) -> StoreResult<usize> {
        self.db
            .with_conn(|conn| {
                let n = conn.execute("UPDATE users SET daily_usage = 0", [])?;
                Ok(n)
            })
            .await
    }

    /// Fetch a full user record, or `None` if it does not exist.
    #[instrument(skip(self))]
    pub async fn get(&self, telegram_id: i64) -> StoreResult<Option<UserRecord>> {
        self.db
            .with_conn(move |conn| {
                let result = conn.query_row(
                    "SELECT telegram_id, telegram_name, token, contribution, credit, \
                     total_usage, daily_usage, is_banned, temp_ban_until \
                     FROM users WHERE telegram_id = ?1",
                    rusqlite::params![telegram_id],
                    map_user_row,
                );
                match result {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List every account, ordered by contribution descending.
    #[instrument(skip(self))]
    pub async fn list(&self) -> StoreResult<Vec<UserRecord>> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT telegram_id, telegram_name, token, contribution, credit, \
                     total_usage, daily_usage, is_banned, temp_ban_until \
                     FROM users ORDER BY contribution DESC",
                )?;
                let rows = stmt.query_map([], map_user_row)?;
                let mut users = Vec::new();
                for row in rows {
                    users.push(row?);
                }
                Ok(users)
            })
            .await
    }
}

/// Map a full SELECT row into a [`UserRecord`].
fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        telegram_id: row.get(0)?,
        telegram_name: row.get(1)?,
        token: row.get(2)?,
        contribution: row.get(3)?,
        credit: row.get(4)?,
        total_usage: row.get(5)?,
        daily_usage: row.get(6)?,
        is_banned: row.get(7)?,
        temp_ban_until: row.get(8)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> UserStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        UserStore::new(db)
    }

    #[tokio::test]
    async fn create_returns_token_and_is_stable() {
        let store = store().await;

        let token = store.create_or_update(42, Some("alice")).await.unwrap();
        assert_eq!(token.len(), TOKEN_LEN);

        // A second call must not rotate the token.
        let again = store.create_or_update(42, None).await.unwrap();
        assert_eq!(token, again);
    }

    #[tokio::test]
    async fn validate_checks_secret_and_bans() {
        let store = store().await;
        let token = store.create_or_update(42, None).await.unwrap();

        assert!(store.validate(42, &token).await.unwrap());
        assert!(!store.validate(42, "wrong").await.unwrap());
        assert!(!store.validate(99, &token).await.unwrap());

        store.set_banned(42, true).await.unwrap();
        assert!(!store.validate(42, &token).await.unwrap());
        store.set_banned(42, false).await.unwrap();
        assert!(store.validate(42, &token).await.unwrap());
    }

    #[tokio::test]
    async fn temp_ban_expires() {
        let store = store().await;
        let token = store.create_or_update(42, None).await.unwrap();
        let now = Utc::now().timestamp();

        store.set_temp_ban(42, now + 3600).await.unwrap();
        assert!(!store.validate(42, &token).await.unwrap());

        store.set_temp_ban(42, now - 1).await.unwrap();
        assert!(store.validate(42, &token).await.unwrap());
    }

    #[tokio::test]
    async fn credit_defaults_to_zero_for_missing_users() {
        let store = store().await;
        assert_eq!(store.get_credit(7).await.unwrap(), 0);

        store.create_or_update(7, None).await.unwrap();
        store.add_credit(7, 5).await.unwrap();
        assert_eq!(store.get_credit(7).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn refresh_token_rotates() {
        let store = store().await;
        let token = store.create_or_update(1, None).await.unwrap();

        let new = store.refresh_token(1).await.unwrap().unwrap();
        assert_ne!(token, new);
        assert!(store.validate(1, &new).await.unwrap());
        assert!(!store.validate(1, &token).await.unwrap());

        assert!(store.refresh_token(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn usage_and_contribution_counters() {
        let store = store().await;
        store.create_or_update(1, None).await.unwrap();

        store.record_usage(1).await.unwrap();
        store.record_usage(1).await.unwrap();
        store.add_contribution(1, 1).await.unwrap();

        let user = store.get(1).await.unwrap().unwrap();
        assert_eq!(user.total_usage, 2);
        assert_eq!(user.daily_usage, 2);
        assert_eq!(user.contribution, 1);

        let reset = store.reset_daily_usage().await.unwrap();
        assert_eq!(reset, 1);
        let user = store.get(1).await.unwrap().unwrap();
        assert_eq!(user.total_usage, 2);
        assert_eq!(user.daily_usage, 0);
    }

    #[tokio::test]
    async fn list_orders_by_contribution() {
        let store = store().await;
        store.create_or_update(1, Some("low")).await.unwrap();
        store.create_or_update(2, Some("high")).await.unwrap();
        store.add_contribution(2, 10).await.unwrap();

        let users = store.list().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].telegram_id, 2);
    }
}
