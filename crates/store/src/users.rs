//! User rows. Storage only — authentication semantics live at the HTTP layer.

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use revline_core::time::now_iso;

use crate::Db;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub api_key: Option<String>,
    pub created_at: String,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        api_key: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Db {
    /// Returns `false` when the email or api key is already taken.
    pub fn insert_user(&self, id: &str, email: &str, name: &str, api_key: Option<&str>) -> Result<bool> {
        let result = self.conn().execute(
            "INSERT INTO users (id, email, name, api_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, email, name, api_key, now_iso()],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e).context("insert user"),
        }
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.conn()
            .query_row(
                "SELECT id, email, name, api_key, created_at FROM users WHERE id = ?1",
                [id],
                |row| row_to_user(row),
            )
            .optional()
            .context("get user")
    }

    pub fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<UserRow>> {
        self.conn()
            .query_row(
                "SELECT id, email, name, api_key, created_at FROM users WHERE api_key = ?1",
                [api_key],
                |row| row_to_user(row),
            )
            .optional()
            .context("get user by api key")
    }
}
