//! Session rows: backend descriptor plus the three file-set overlays.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use revline_core::BackendKind;
use revline_core::time::now_iso;

use crate::Db;

/// A review session as stored. The effective file set is derived at read
/// time from the overlays plus the backend's change list.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub backend: BackendKind,
    pub project: String,
    pub branch: String,
    pub target_branch: String,
    /// path → agent id that registered it.
    pub registered_files: BTreeMap<String, String>,
    pub manual_additions: BTreeSet<String>,
    pub manual_removals: BTreeSet<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRow {
    pub fn new(id: String, backend: BackendKind, project: String, branch: String, target_branch: String) -> Self {
        let now = now_iso();
        Self {
            id,
            backend,
            project,
            branch,
            target_branch,
            registered_files: BTreeMap::new(),
            manual_additions: BTreeSet::new(),
            manual_removals: BTreeSet::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let backend_json: String = row.get(1)?;
    let registered: String = row.get(5)?;
    let additions: String = row.get(6)?;
    let removals: String = row.get(7)?;
    Ok(SessionRow {
        id: row.get(0)?,
        backend: serde_json::from_str(&backend_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        project: row.get(2)?,
        branch: row.get(3)?,
        target_branch: row.get(4)?,
        registered_files: serde_json::from_str(&registered).unwrap_or_default(),
        manual_additions: serde_json::from_str(&additions).unwrap_or_default(),
        manual_removals: serde_json::from_str(&removals).unwrap_or_default(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const SESSION_COLUMNS: &str = "id, backend, project, branch, target_branch, \
     registered_files, manual_additions, manual_removals, created_at, updated_at";

impl Db {
    pub fn insert_session(&self, s: &SessionRow) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO sessions (id, backend, project, branch, target_branch,
                     registered_files, manual_additions, manual_removals, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    s.id,
                    serde_json::to_string(&s.backend)?,
                    s.project,
                    s.branch,
                    s.target_branch,
                    serde_json::to_string(&s.registered_files)?,
                    serde_json::to_string(&s.manual_additions)?,
                    serde_json::to_string(&s.manual_removals)?,
                    s.created_at,
                    s.updated_at,
                ],
            )
            .context("insert session")?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                [id],
                |row| row_to_session(row),
            )
            .optional()
            .context("get session")
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| row_to_session(row))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list sessions")?;
        Ok(rows)
    }

    /// Persist the three overlays. `updated_at` never goes backwards.
    pub fn save_session_overlays(&self, s: &SessionRow) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE sessions SET registered_files = ?2, manual_additions = ?3,
                     manual_removals = ?4, updated_at = MAX(updated_at, ?5)
                 WHERE id = ?1",
                params![
                    s.id,
                    serde_json::to_string(&s.registered_files)?,
                    serde_json::to_string(&s.manual_additions)?,
                    serde_json::to_string(&s.manual_removals)?,
                    now_iso(),
                ],
            )
            .context("save session overlays")?;
        anyhow::ensure!(changed == 1, "session {} not found", s.id);
        Ok(())
    }

    pub fn set_target_branch(&self, id: &str, target_branch: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE sessions SET target_branch = ?2, updated_at = MAX(updated_at, ?3)
                 WHERE id = ?1",
                params![id, target_branch, now_iso()],
            )
            .context("set target branch")?;
        Ok(changed == 1)
    }

    /// Watcher-driven freshness bump.
    pub fn touch_session(&self, id: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE sessions SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
                params![id, now_iso()],
            )
            .context("touch session")?;
        Ok(())
    }

    /// Delete the session; comments cascade.
    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", [id])
            .context("delete session")?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn local_session(id: &str) -> SessionRow {
        SessionRow::new(
            id.to_string(),
            BackendKind::Local {
                repo_path: PathBuf::from("/tmp/r"),
                target_branch: "main".into(),
            },
            "r".into(),
            "working".into(),
            "main".into(),
        )
    }

    #[test]
    fn insert_get_round_trips_overlays() {
        let db = Db::open_in_memory().unwrap();
        let mut s = local_session("s1");
        s.registered_files.insert("a.rs".into(), "agent-1".into());
        s.manual_additions.insert("b.rs".into());
        s.manual_removals.insert("c.rs".into());
        db.insert_session(&s).unwrap();

        let got = db.get_session("s1").unwrap().unwrap();
        assert_eq!(got.registered_files["a.rs"], "agent-1");
        assert!(got.manual_additions.contains("b.rs"));
        assert!(got.manual_removals.contains("c.rs"));
        assert_eq!(got.target_branch, "main");
        assert!(db.get_session("missing").unwrap().is_none());
    }

    #[test]
    fn overlay_update_bumps_updated_at_monotonically() {
        let db = Db::open_in_memory().unwrap();
        let mut s = local_session("s1");
        db.insert_session(&s).unwrap();
        let before = db.get_session("s1").unwrap().unwrap().updated_at;

        s.manual_additions.insert("x.rs".into());
        db.save_session_overlays(&s).unwrap();
        let after = db.get_session("s1").unwrap().unwrap().updated_at;
        assert!(after >= before);
    }

    #[test]
    fn set_target_branch_and_delete() {
        let db = Db::open_in_memory().unwrap();
        db.insert_session(&local_session("s1")).unwrap();
        assert!(db.set_target_branch("s1", "develop").unwrap());
        assert_eq!(
            db.get_session("s1").unwrap().unwrap().target_branch,
            "develop"
        );
        assert!(db.delete_session("s1").unwrap());
        assert!(!db.delete_session("s1").unwrap());
    }
}
