//! SQLite persistence for huddle.
//!
//! There is no foreign-key engine doing the bookkeeping here: every
//! cross-collection rule (membership before access, one conversation per
//! pair, cascade on workspace delete) is enforced by the operations in this
//! crate. Uniqueness races are closed with UNIQUE constraints and
//! `ON CONFLICT DO NOTHING`, state transitions with conditional `UPDATE`s.

pub mod channels;
pub mod conversations;
pub mod error;
pub mod invites;
pub mod membership;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reads;
pub mod users;
pub mod workspaces;

pub use error::{Result, StoreError};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        f(&conn)
    }

    /// Exclusive access for operations that need a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        f(&mut conn)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use chrono::Utc;
    use huddle_types::models::{User, Workspace};
    use uuid::Uuid;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn user(db: &Database, name: &str) -> User {
        db.upsert_user(Uuid::new_v4(), name, &format!("{name}@example.com"), None)
            .unwrap()
    }

    pub fn workspace(db: &Database, owner: &User) -> Workspace {
        db.create_workspace("Acme", owner.id, None).unwrap()
    }

    pub fn now() -> chrono::DateTime<Utc> {
        Utc::now()
    }
}
