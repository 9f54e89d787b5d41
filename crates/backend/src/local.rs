//! Backend over a local git working tree.
//!
//! The diff is `git diff target...working-tree`; comments live in the
//! embedded store, keyed by the owning session row.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use revline_core::hash::{line_content_hash, new_uuid, sha256_hex};
use revline_core::time::now_iso;
use revline_core::{ServiceError, SessionType};
use revline_git_cli::ChangedFile;
use revline_git_cli::ops;
use revline_store::{CommentRow, Db};

use crate::{DiffSide, NewComment, ReviewBackend};

pub struct LocalBackend {
    repo_path: PathBuf,
    target_branch: String,
    /// Session row id — comment rows reference it.
    store_session_id: String,
    /// Paths the review tracks beyond git's own change list; untracked ones
    /// get synthetic new-file diffs.
    tracked_extra: Vec<String>,
    db: Db,
}

impl LocalBackend {
    pub fn new(
        repo_path: PathBuf,
        target_branch: String,
        store_session_id: String,
        tracked_extra: Vec<String>,
        db: Db,
    ) -> Self {
        Self {
            repo_path,
            target_branch,
            store_session_id,
            tracked_extra,
            db,
        }
    }

    /// Untracked files among the registered/added extras.
    fn untracked_extras(&self) -> Vec<String> {
        let untracked = ops::untracked_files(&self.repo_path);
        self.tracked_extra
            .iter()
            .filter(|f| untracked.contains(f))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReviewBackend for LocalBackend {
    fn session_id(&self) -> String {
        let key = format!("{}||{}", self.repo_path.display(), self.target_branch);
        format!("local:{}", sha256_hex(key.as_bytes()))
    }

    fn session_type(&self) -> SessionType {
        SessionType::Local
    }

    fn descriptor(&self) -> serde_json::Value {
        json!({
            "type": "local",
            "repo_path": self.repo_path,
            "target_branch": self.target_branch,
        })
    }

    async fn list_files(&self) -> Result<Vec<ChangedFile>, ServiceError> {
        Ok(ops::changed_files(&self.repo_path, &self.target_branch))
    }

    async fn get_diff(&self) -> Result<String, ServiceError> {
        Ok(ops::diff(
            &self.repo_path,
            &self.target_branch,
            &self.untracked_extras(),
        ))
    }

    async fn file_content(
        &self,
        file: &str,
        side: DiffSide,
        range: Option<(u32, u32)>,
    ) -> Result<Option<String>, ServiceError> {
        let at_ref = match side {
            DiffSide::Base => Some(self.target_branch.as_str()),
            DiffSide::Head => None,
        };
        let content = ops::file_content(&self.repo_path, at_ref, file);
        Ok(match (content, range) {
            (Some(content), Some((from, to))) => crate::extract_lines(&content, from, to),
            (content, None) => content,
            (None, _) => None,
        })
    }

    async fn list_comments(&self) -> Result<Vec<CommentRow>, ServiceError> {
        self.db
            .list_comments(&self.store_session_id, None)
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }

    async fn add_comment(&self, new: NewComment) -> Result<CommentRow, ServiceError> {
        let now = now_iso();
        let row = CommentRow {
            id: new_uuid(),
            session_id: self.store_session_id.clone(),
            parent_id: new.parent_id,
            file: new.file,
            line: new.line,
            side: new.side,
            body: new.body,
            author: new.author,
            line_content_hash: line_content_hash(new.line_content.as_deref()),
            line_content: new.line_content,
            context_before: new.context_before,
            context_after: new.context_after,
            resolved: false,
            created_at: now.clone(),
            updated_at: now,
        };
        self.db
            .insert_comment(&row)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(row)
    }

    async fn resolve_comment(&self, id: &str) -> Result<(), ServiceError> {
        match self.db.set_comment_resolved(id, true) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServiceError::NotFound(format!("comment {id} not found"))),
            Err(e) => Err(ServiceError::Internal(e.to_string())),
        }
    }

    async fn unresolve_comment(&self, id: &str) -> Result<(), ServiceError> {
        match self.db.set_comment_resolved(id, false) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServiceError::NotFound(format!("comment {id} not found"))),
            Err(e) => Err(ServiceError::Internal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_core::BackendKind;
    use revline_git_cli::test_utils::{init_test_repo, write_file};
    use revline_store::SessionRow;

    fn backend(tmp: &std::path::Path, extras: Vec<String>) -> (LocalBackend, Db) {
        let db = Db::open_in_memory().unwrap();
        db.insert_session(&SessionRow::new(
            "s1".into(),
            BackendKind::Local {
                repo_path: tmp.to_path_buf(),
                target_branch: "main".into(),
            },
            "r".into(),
            "working".into(),
            "main".into(),
        ))
        .unwrap();
        (
            LocalBackend::new(tmp.to_path_buf(), "main".into(), "s1".into(), extras, db.clone()),
            db,
        )
    }

    #[test]
    fn session_id_is_prefixed_and_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let (b, _) = backend(tmp.path(), vec![]);
        let id = b.session_id();
        assert!(id.starts_with("local:"));
        assert_eq!(id, b.session_id());
        assert_eq!(b.session_type(), SessionType::Local);
    }

    #[tokio::test]
    async fn diff_includes_registered_untracked_files() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        write_file(tmp.path(), "README.md", "hello\nedited\n");
        write_file(tmp.path(), "notes.txt", "n1\n");

        let (b, _) = backend(tmp.path(), vec!["notes.txt".into()]);
        let diff = b.get_diff().await.unwrap();
        assert!(diff.contains("+edited"));
        assert!(diff.contains("+++ b/notes.txt"));

        // without registration, the untracked file is not in the diff
        let (plain, _) = backend(tmp.path(), vec![]);
        let diff = plain.get_diff().await.unwrap();
        assert!(!diff.contains("notes.txt"));
    }

    #[tokio::test]
    async fn file_content_sides_and_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        write_file(tmp.path(), "README.md", "line1\nline2\nline3\n");

        let (b, _) = backend(tmp.path(), vec![]);
        let base = b.file_content("README.md", DiffSide::Base, None).await.unwrap();
        assert!(base.unwrap().contains("hello"));

        let head = b
            .file_content("README.md", DiffSide::Head, Some((2, 3)))
            .await
            .unwrap();
        assert_eq!(head.as_deref(), Some("line2\nline3"));

        let missing = b.file_content("ghost.md", DiffSide::Head, None).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn comment_lifecycle_through_the_backend() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let (b, db) = backend(tmp.path(), vec![]);

        let row = b
            .add_comment(NewComment {
                file: "README.md".into(),
                line: 1,
                body: "why?".into(),
                author: "u".into(),
                line_content: Some("hello".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(row.line_content_hash.len(), 64);
        assert!(!row.resolved);

        b.resolve_comment(&row.id).await.unwrap();
        assert!(db.get_comment(&row.id).unwrap().unwrap().resolved);
        b.unresolve_comment(&row.id).await.unwrap();
        assert!(!db.get_comment(&row.id).unwrap().unwrap().resolved);

        let err = b.resolve_comment("nope").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
