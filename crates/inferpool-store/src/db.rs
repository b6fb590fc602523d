//! SQLite handle for the user database.
//!
//! Authentication sits on the hot path of every endpoint: each submit,
//! fetch, and result delivery does a point read against the users table
//! before it touches the queue.  The handle keeps one connection behind a
//! mutex and pushes every operation onto tokio's blocking pool, so a slow
//! disk stalls only the calling request, never the runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Shared handle to the users database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and tune the connection.
    ///
    /// Blocks briefly on file I/O; call during startup, before request
    /// handling begins.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tune(&conn)?;

        info!(path = %path.display(), "user database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        tune(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open `path` and bring its schema up to date in one step.
    pub async fn open_and_migrate(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let db = tokio::task::spawn_blocking(move || Self::open(path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply any migrations newer than the schema on disk.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.with_conn(migration::run_all).await
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The single entry point for all queries; `UserStore` builds every
    /// operation on top of it.  A poisoned connection mutex surfaces as
    /// [`StoreError::TaskJoin`] rather than tearing down the caller.
    pub async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("connection mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }
}

/// Connection tuning for this workload: many short point reads from
/// request handlers, occasional single-row counter writes.
fn tune(conn: &Connection) -> StoreResult<()> {
    // WAL lets authentication reads proceed while an accounting write
    // commits.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Under WAL, NORMAL only risks the most recent counter bump on power
    // loss; credentials and ban flags are never corrupted.
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // Writers wait for each other instead of failing outright.
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_conn_round_trips_user_rows() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (telegram_id, token) VALUES (7, 'secret')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let token: String = db
            .with_conn(|conn| {
                let t = conn.query_row(
                    "SELECT token FROM users WHERE telegram_id = 7",
                    [],
                    |row| row.get(0),
                )?;
                Ok(t)
            })
            .await
            .unwrap();
        assert_eq!(token, "secret");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        db.run_migrations().await.unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                let c: i64 = conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn open_and_migrate_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inferpool.db");

        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (telegram_id, token) VALUES (1, 'abc')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        // Reopening sees the same schema and data.
        let reopened = Database::open_and_migrate(path).await.unwrap();
        let count: i64 = reopened
            .with_conn(|conn| {
                let c: i64 = conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
