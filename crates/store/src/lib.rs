//! Embedded SQLite store.
//!
//! One file-backed connection in WAL mode behind a mutex — the store's write
//! lock is the concurrency boundary for session mutations. All access goes
//! through prepared statements in the per-table modules.

pub mod comments;
pub mod oauth;
pub mod sessions;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

pub use comments::CommentRow;
pub use oauth::{OAuthClientRow, OAuthStateRow, OAuthTokenRow};
pub use sessions::SessionRow;
pub use users::UserRow;

/// A named migration: `(name, sql)`.
type Migration = (&'static str, &'static str);

const MIGRATIONS: &[Migration] = &[("0001_schema", include_str!("../migrations/0001_schema.sql"))];

/// Shared database handle.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory SQLite database")?;
        init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Open (or create) the database under `data_dir` and run migrations.
pub fn init_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("revline.db");
    let conn = Connection::open(&db_path).context("opening SQLite database")?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_connection(&conn)?;
    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
    })
}

fn init_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    run_migrations(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("applied migration: {name}");
        }
    }

    Ok(())
}
