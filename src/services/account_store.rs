//! SQLite-backed account store.
//!
//! One `users` table holds every console account. The store enforces the
//! administrator invariants itself: the last admin cannot be demoted or
//! deleted and the last account cannot be deleted.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use crate::errors::{StoreError, StoreResult};
use crate::models::Account;

#[derive(Clone)]
pub struct AccountStore {
    conn: Arc<Mutex<Connection>>,
}

const ACCOUNT_COLUMNS: &str = "id, username, password_hash, is_admin, wallpaper";

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        is_admin: row.get::<_, i64>(3)? != 0,
        wallpaper: row.get(4)?,
    })
}

impl AccountStore {
    /// Open or create the account database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        tracing::info!("Opened account database at {:?}", path.as_ref());
        Ok(store)
    }

    /// In-memory database, used by tests
    pub fn open_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                wallpaper TEXT
            );
            "#,
        )?;

        // Databases created before wallpapers existed lack the column
        match conn.execute("ALTER TABLE users ADD COLUMN wallpaper TEXT", []) {
            Ok(_) => tracing::info!("Added wallpaper column to users table"),
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column") => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Inserts the bootstrap administrator unless an account with that name exists.
    /// Returns true when the account was created.
    pub fn ensure_bootstrap_admin(&self, username: &str, password_hash: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (username, password_hash, is_admin) VALUES (?1, ?2, 1)",
            params![username, password_hash],
        )?;
        Ok(inserted > 0)
    }

    pub fn create_account(&self, username: &str, password_hash: &str, is_admin: bool) -> StoreResult<Account> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (username, password_hash, is_admin) VALUES (?1, ?2, ?3)",
            params![username, password_hash, is_admin as i64],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicateUsername(username.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Account {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            wallpaper: None,
        })
    }

    pub fn find_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", ACCOUNT_COLUMNS),
                params![username],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn find_by_id(&self, id: i64) -> StoreResult<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", ACCOUNT_COLUMNS),
                params![id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", ACCOUNT_COLUMNS))?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub fn count_accounts(&self) -> StoreResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    pub fn count_admins(&self) -> StoreResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM users WHERE is_admin = 1", [], |row| row.get(0))?)
    }

    /// The oldest administrator; the file manager admin is mirrored from it
    pub fn first_admin(&self) -> StoreResult<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE is_admin = 1 ORDER BY id LIMIT 1", ACCOUNT_COLUMNS),
                [],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn set_password(&self, id: i64, password_hash: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Grants or revokes the admin role. Revoking it from the only admin fails
    /// and leaves the table untouched.
    pub fn set_admin(&self, id: i64, is_admin: bool) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row("SELECT is_admin FROM users WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        let current = current.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if current != 0 && !is_admin {
            let admins: i64 = tx.query_row("SELECT COUNT(*) FROM users WHERE is_admin = 1", [], |row| row.get(0))?;
            if admins <= 1 {
                return Err(StoreError::LastAdmin);
            }
        }

        tx.execute(
            "UPDATE users SET is_admin = ?1 WHERE id = ?2",
            params![is_admin as i64, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes `username` on behalf of `acting_username`.
    ///
    /// Refuses self-deletion, deleting the last remaining account, and
    /// deleting an admin when no other admin would remain.
    pub fn delete_account(&self, username: &str, acting_username: &str) -> StoreResult<Account> {
        if username == acting_username {
            return Err(StoreError::SelfDeletion);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let account = tx
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", ACCOUNT_COLUMNS),
                params![username],
                row_to_account,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(username.to_string()))?;

        let total: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if total <= 1 {
            return Err(StoreError::LastAccount);
        }

        if account.is_admin {
            let admins: i64 = tx.query_row("SELECT COUNT(*) FROM users WHERE is_admin = 1", [], |row| row.get(0))?;
            if admins <= 1 {
                return Err(StoreError::LastAdmin);
            }
        }

        tx.execute("DELETE FROM users WHERE id = ?1", params![account.id])?;
        tx.commit()?;
        Ok(account)
    }

    pub fn set_wallpaper(&self, id: i64, wallpaper: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET wallpaper = ?1 WHERE id = ?2",
            params![wallpaper, id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Runs `op` against the store on the blocking thread pool
    pub async fn call<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&AccountStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    pub fn wallpaper(&self, id: i64) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT wallpaper FROM users WHERE id = ?1",
            params![id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
