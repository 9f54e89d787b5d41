//! Threaded comment rows.

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use revline_core::time::now_iso;

use crate::Db;

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: String,
    pub session_id: String,
    /// Root comments have no parent; replies cascade on delete.
    pub parent_id: Option<String>,
    pub file: String,
    /// 1-indexed against the new side of the diff.
    pub line: i64,
    pub side: Option<String>,
    pub body: String,
    pub author: String,
    pub line_content: Option<String>,
    pub context_before: Option<Vec<String>>,
    pub context_after: Option<Vec<String>>,
    /// SHA-256 of the captured line content (empty string for null).
    pub line_content_hash: String,
    pub resolved: bool,
    pub created_at: String,
    pub updated_at: String,
}

const COMMENT_COLUMNS: &str = "id, session_id, parent_id, file, line, side, body, author, \
     line_content, context_before, context_after, line_content_hash, resolved, \
     created_at, updated_at";

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRow> {
    let before: Option<String> = row.get(9)?;
    let after: Option<String> = row.get(10)?;
    Ok(CommentRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_id: row.get(2)?,
        file: row.get(3)?,
        line: row.get(4)?,
        side: row.get(5)?,
        body: row.get(6)?,
        author: row.get(7)?,
        line_content: row.get(8)?,
        context_before: before.and_then(|s| serde_json::from_str(&s).ok()),
        context_after: after.and_then(|s| serde_json::from_str(&s).ok()),
        line_content_hash: row.get(11)?,
        resolved: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn context_json(ctx: &Option<Vec<String>>) -> Result<Option<String>> {
    Ok(match ctx {
        Some(lines) => Some(serde_json::to_string(lines)?),
        None => None,
    })
}

impl Db {
    pub fn insert_comment(&self, c: &CommentRow) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO comments (id, session_id, parent_id, file, line, side, body,
                     author, line_content, context_before, context_after, line_content_hash,
                     resolved, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    c.id,
                    c.session_id,
                    c.parent_id,
                    c.file,
                    c.line,
                    c.side,
                    c.body,
                    c.author,
                    c.line_content,
                    context_json(&c.context_before)?,
                    context_json(&c.context_after)?,
                    c.line_content_hash,
                    c.resolved,
                    c.created_at,
                    c.updated_at,
                ],
            )
            .context("insert comment")?;
        Ok(())
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.conn()
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                [id],
                |row| row_to_comment(row),
            )
            .optional()
            .context("get comment")
    }

    /// All comments of a session in creation order, optionally one file only.
    pub fn list_comments(&self, session_id: &str, file: Option<&str>) -> Result<Vec<CommentRow>> {
        let conn = self.conn();
        let rows = match file {
            Some(file) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments
                     WHERE session_id = ?1 AND file = ?2 ORDER BY created_at, rowid"
                ))?;
                let rows = stmt
                    .query_map(params![session_id, file], |row| row_to_comment(row))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments
                     WHERE session_id = ?1 ORDER BY created_at, rowid"
                ))?;
                let rows = stmt
                    .query_map([session_id], |row| row_to_comment(row))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
        };
        rows.context("list comments")
    }

    pub fn set_comment_resolved(&self, id: &str, resolved: bool) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE comments SET resolved = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, resolved, now_iso()],
            )
            .context("set comment resolved")?;
        Ok(changed == 1)
    }

    /// Delete a comment and (via FK cascade) its descendants. Returns the
    /// number of rows removed, 0 when the id was unknown.
    pub fn delete_comment(&self, id: &str) -> Result<usize> {
        let conn = self.conn();
        let subtree: i64 = conn
            .query_row(
                "WITH RECURSIVE sub(id) AS (
                     SELECT id FROM comments WHERE id = ?1
                     UNION ALL
                     SELECT c.id FROM comments c JOIN sub ON c.parent_id = sub.id
                 )
                 SELECT COUNT(*) FROM sub",
                [id],
                |row| row.get(0),
            )
            .context("count comment subtree")?;
        conn.execute("DELETE FROM comments WHERE id = ?1", [id])
            .context("delete comment")?;
        Ok(subtree as usize)
    }

    /// Open comments for a session, replies included.
    pub fn unresolved_count(&self, session_id: &str) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM comments WHERE session_id = ?1 AND resolved = 0",
                [session_id],
                |row| row.get(0),
            )
            .context("unresolved count")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionRow;
    use revline_core::BackendKind;
    use revline_core::hash::line_content_hash;
    use std::path::PathBuf;

    fn db_with_session(id: &str) -> Db {
        let db = Db::open_in_memory().unwrap();
        db.insert_session(&SessionRow::new(
            id.to_string(),
            BackendKind::Local {
                repo_path: PathBuf::from("/tmp/r"),
                target_branch: "main".into(),
            },
            "r".into(),
            "working".into(),
            "main".into(),
        ))
        .unwrap();
        db
    }

    fn comment(id: &str, session: &str, parent: Option<&str>) -> CommentRow {
        let now = now_iso();
        CommentRow {
            id: id.to_string(),
            session_id: session.to_string(),
            parent_id: parent.map(String::from),
            file: "a.ts".into(),
            line: 5,
            side: None,
            body: format!("comment {id}"),
            author: "u".into(),
            line_content: Some("let x = 1;".into()),
            context_before: Some(vec!["// above".into()]),
            context_after: None,
            line_content_hash: line_content_hash(Some("let x = 1;")),
            resolved: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn insert_list_round_trip() {
        let db = db_with_session("s1");
        db.insert_comment(&comment("c1", "s1", None)).unwrap();
        db.insert_comment(&comment("c2", "s1", Some("c1"))).unwrap();

        let all = db.list_comments("s1", None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "c1");
        assert_eq!(all[1].parent_id.as_deref(), Some("c1"));
        assert_eq!(all[0].context_before.as_deref(), Some(&["// above".to_string()][..]));

        let filtered = db.list_comments("s1", Some("other.ts")).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn resolve_and_unresolved_count_includes_replies() {
        let db = db_with_session("s1");
        db.insert_comment(&comment("c1", "s1", None)).unwrap();
        db.insert_comment(&comment("c2", "s1", Some("c1"))).unwrap();
        assert_eq!(db.unresolved_count("s1").unwrap(), 2);

        assert!(db.set_comment_resolved("c1", true).unwrap());
        assert_eq!(db.unresolved_count("s1").unwrap(), 1);
        assert!(!db.set_comment_resolved("ghost", true).unwrap());
    }

    #[test]
    fn delete_cascades_to_descendants() {
        let db = db_with_session("s1");
        db.insert_comment(&comment("c1", "s1", None)).unwrap();
        db.insert_comment(&comment("c2", "s1", Some("c1"))).unwrap();
        db.insert_comment(&comment("c3", "s1", Some("c2"))).unwrap();

        assert_eq!(db.delete_comment("c1").unwrap(), 3);
        assert!(db.list_comments("s1", None).unwrap().is_empty());
        assert_eq!(db.delete_comment("c1").unwrap(), 0);
    }

    #[test]
    fn session_delete_cascades_to_comments() {
        let db = db_with_session("s1");
        db.insert_comment(&comment("c1", "s1", None)).unwrap();
        db.delete_session("s1").unwrap();
        assert!(db.get_comment("c1").unwrap().is_none());
    }
}
