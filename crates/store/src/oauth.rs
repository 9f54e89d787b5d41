//! OAuth provider storage: clients, authorization state, and tokens.
//!
//! Expiry is wall-clock unix seconds; an expired row is treated as absent by
//! every getter, so callers never see stale artefacts.

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use revline_core::time::{now_iso, now_unix};

use crate::Db;

#[derive(Debug, Clone)]
pub struct OAuthClientRow {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct OAuthStateRow {
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    /// Authorization code, set once the user approves.
    pub code: Option<String>,
    pub expires_at: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct OAuthTokenRow {
    pub token: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub scope: String,
    pub expires_at: i64,
    pub created_at: String,
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<OAuthStateRow> {
    Ok(OAuthStateRow {
        state: row.get(0)?,
        client_id: row.get(1)?,
        redirect_uri: row.get(2)?,
        scope: row.get(3)?,
        code_challenge: row.get(4)?,
        code: row.get(5)?,
        expires_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<OAuthTokenRow> {
    Ok(OAuthTokenRow {
        token: row.get(0)?,
        client_id: row.get(1)?,
        user_id: row.get(2)?,
        scope: row.get(3)?,
        expires_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const STATE_COLUMNS: &str =
    "state, client_id, redirect_uri, scope, code_challenge, code, expires_at, created_at";
const TOKEN_COLUMNS: &str = "token, client_id, user_id, scope, expires_at, created_at";

impl Db {
    pub fn insert_oauth_client(&self, c: &OAuthClientRow) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO oauth_clients (id, secret, name, redirect_uris, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    c.id,
                    c.secret,
                    c.name,
                    serde_json::to_string(&c.redirect_uris)?,
                    c.created_at,
                ],
            )
            .context("insert oauth client")?;
        Ok(())
    }

    pub fn get_oauth_client(&self, id: &str) -> Result<Option<OAuthClientRow>> {
        self.conn()
            .query_row(
                "SELECT id, secret, name, redirect_uris, created_at
                 FROM oauth_clients WHERE id = ?1",
                [id],
                |row| {
                    let uris: String = row.get(3)?;
                    Ok(OAuthClientRow {
                        id: row.get(0)?,
                        secret: row.get(1)?,
                        name: row.get(2)?,
                        redirect_uris: serde_json::from_str(&uris).unwrap_or_default(),
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("get oauth client")
    }

    pub fn insert_oauth_state(&self, s: &OAuthStateRow) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO oauth_state (state, client_id, redirect_uri, scope,
                     code_challenge, code, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    s.state,
                    s.client_id,
                    s.redirect_uri,
                    s.scope,
                    s.code_challenge,
                    s.code,
                    s.expires_at,
                    s.created_at,
                ],
            )
            .context("insert oauth state")?;
        Ok(())
    }

    /// Look up a pending exchange by authorization code. Expired → absent.
    pub fn take_oauth_state_by_code(&self, code: &str) -> Result<Option<OAuthStateRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM oauth_state
                     WHERE code = ?1 AND expires_at > ?2"
                ),
                params![code, now_unix()],
                |row| row_to_state(row),
            )
            .optional()
            .context("get oauth state by code")?;
        if row.is_some() {
            // Codes are single-use.
            conn.execute("DELETE FROM oauth_state WHERE code = ?1", [code])
                .context("consume oauth code")?;
        }
        Ok(row)
    }

    pub fn insert_access_token(&self, t: &OAuthTokenRow) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO oauth_access_tokens (token, client_id, user_id, scope, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![t.token, t.client_id, t.user_id, t.scope, t.expires_at, t.created_at],
            )
            .context("insert access token")?;
        Ok(())
    }

    pub fn insert_refresh_token(&self, t: &OAuthTokenRow) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO oauth_refresh_tokens (token, client_id, user_id, scope, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![t.token, t.client_id, t.user_id, t.scope, t.expires_at, t.created_at],
            )
            .context("insert refresh token")?;
        Ok(())
    }

    pub fn get_access_token(&self, token: &str) -> Result<Option<OAuthTokenRow>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM oauth_access_tokens
                     WHERE token = ?1 AND expires_at > ?2"
                ),
                params![token, now_unix()],
                |row| row_to_token(row),
            )
            .optional()
            .context("get access token")
    }

    pub fn get_refresh_token(&self, token: &str) -> Result<Option<OAuthTokenRow>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM oauth_refresh_tokens
                     WHERE token = ?1 AND expires_at > ?2"
                ),
                params![token, now_unix()],
                |row| row_to_token(row),
            )
            .optional()
            .context("get refresh token")
    }

    pub fn revoke_access_token(&self, token: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM oauth_access_tokens WHERE token = ?1", [token])
            .context("revoke access token")?;
        Ok(changed == 1)
    }

    pub fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM oauth_refresh_tokens WHERE token = ?1", [token])
            .context("revoke refresh token")?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(db: &Db, id: &str) {
        db.insert_oauth_client(&OAuthClientRow {
            id: id.to_string(),
            secret: "s3cret".into(),
            name: "cli".into(),
            redirect_uris: vec!["http://localhost:7777/cb".into()],
            created_at: now_iso(),
        })
        .unwrap();
    }

    #[test]
    fn client_round_trip() {
        let db = Db::open_in_memory().unwrap();
        client(&db, "c1");
        let got = db.get_oauth_client("c1").unwrap().unwrap();
        assert_eq!(got.redirect_uris, vec!["http://localhost:7777/cb"]);
        assert!(db.get_oauth_client("nope").unwrap().is_none());
    }

    #[test]
    fn codes_are_single_use_and_expire() {
        let db = Db::open_in_memory().unwrap();
        client(&db, "c1");

        db.insert_oauth_state(&OAuthStateRow {
            state: "st1".into(),
            client_id: "c1".into(),
            redirect_uri: "http://localhost:7777/cb".into(),
            scope: "read".into(),
            code_challenge: None,
            code: Some("code-live".into()),
            expires_at: now_unix() + 600,
            created_at: now_iso(),
        })
        .unwrap();
        db.insert_oauth_state(&OAuthStateRow {
            state: "st2".into(),
            client_id: "c1".into(),
            redirect_uri: "http://localhost:7777/cb".into(),
            scope: "read".into(),
            code_challenge: None,
            code: Some("code-dead".into()),
            expires_at: now_unix() - 1,
            created_at: now_iso(),
        })
        .unwrap();

        assert!(db.take_oauth_state_by_code("code-dead").unwrap().is_none());
        let live = db.take_oauth_state_by_code("code-live").unwrap().unwrap();
        assert_eq!(live.state, "st1");
        // second take fails: single use
        assert!(db.take_oauth_state_by_code("code-live").unwrap().is_none());
    }

    #[test]
    fn expired_tokens_are_absent() {
        let db = Db::open_in_memory().unwrap();
        client(&db, "c1");

        let mk = |token: &str, delta: i64| OAuthTokenRow {
            token: token.to_string(),
            client_id: "c1".into(),
            user_id: None,
            scope: "read".into(),
            expires_at: now_unix() + delta,
            created_at: now_iso(),
        };
        db.insert_access_token(&mk("live", 3600)).unwrap();
        db.insert_access_token(&mk("dead", -1)).unwrap();

        assert!(db.get_access_token("live").unwrap().is_some());
        assert!(db.get_access_token("dead").unwrap().is_none());

        assert!(db.revoke_access_token("live").unwrap());
        assert!(db.get_access_token("live").unwrap().is_none());
        assert!(!db.revoke_access_token("live").unwrap());
    }
}
