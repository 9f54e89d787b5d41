//! Session management: file-set composition, overlay edits, and the
//! review-state snapshot clients render from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use revline_backend::{
    DiffSide, HostedPrBackend, LocalBackend, NewComment, ReviewBackend, parse_pr_ref,
};
use revline_core::config::ENV_DEFAULT_API_TOKEN;
use revline_core::hash;
use revline_core::{BackendKind, ServiceError, SessionType};
use revline_git_cli::ops;
use revline_git_cli::{ChangedFile, FileDiff, parse_diff};
use revline_store::{CommentRow, SessionRow};

use crate::Engine;
use crate::events::EventName;
use crate::threads::{CommentThread, assemble_threads};

/// Session summary exposed by list/detail endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub session_type: SessionType,
    pub project: String,
    pub branch: String,
    pub target_branch: String,
    pub descriptor: serde_json::Value,
    pub registered_files: BTreeMap<String, String>,
    pub manual_additions: BTreeSet<String>,
    pub manual_removals: BTreeSet<String>,
    pub unresolved_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Full review snapshot: files, diff, threads, counts.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewState {
    pub session: SessionView,
    pub files: Vec<String>,
    pub changed_files: Vec<ChangedFile>,
    pub diff: String,
    pub parsed: Vec<FileDiff>,
    pub threads: BTreeMap<String, Vec<CommentThread>>,
    pub unresolved_count: i64,
    pub is_git_repo: bool,
}

/// `(backend_files ∪ registered ∪ additions) \ removals`, alphabetical.
pub fn compose_files(session: &SessionRow, backend_files: &[ChangedFile]) -> Vec<String> {
    let mut set: BTreeSet<String> = backend_files.iter().map(|f| f.path.clone()).collect();
    set.extend(session.registered_files.keys().cloned());
    set.extend(session.manual_additions.iter().cloned());
    for removed in &session.manual_removals {
        set.remove(removed);
    }
    set.into_iter().collect()
}

/// Effective files without going through a backend — local sessions read
/// git directly, hosted sessions fall back to the overlays alone. Used by
/// the watcher, which must stay synchronous.
pub fn effective_files(session: &SessionRow) -> Vec<String> {
    let backend_files = match &session.backend {
        BackendKind::Local {
            repo_path,
            target_branch,
        } => ops::changed_files(repo_path, target_branch),
        BackendKind::Hosted { .. } => Vec::new(),
    };
    compose_files(session, &backend_files)
}

/// Paths the local backend should surface beyond git's change list.
fn tracked_extras(session: &SessionRow) -> Vec<String> {
    let mut extras: BTreeSet<String> = session.registered_files.keys().cloned().collect();
    extras.extend(session.manual_additions.iter().cloned());
    for removed in &session.manual_removals {
        extras.remove(removed);
    }
    extras.into_iter().collect()
}

impl Engine {
    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Get-or-create a session over a local working tree. Rejects paths
    /// that do not exist.
    pub fn get_or_create_local(
        &self,
        repo_path: &Path,
        target_branch: Option<String>,
    ) -> Result<SessionRow, ServiceError> {
        if !repo_path.is_dir() {
            return Err(ServiceError::BadRequest(format!(
                "repo path does not exist: {}",
                repo_path.display()
            )));
        }
        let repo_path: PathBuf =
            std::fs::canonicalize(repo_path).unwrap_or_else(|_| repo_path.to_path_buf());

        let target = target_branch
            .clone()
            .unwrap_or_else(|| ops::detect_default_branch(&repo_path));
        let project = repo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo")
            .to_string();
        let branch = ops::current_branch(&repo_path);
        let id = hash::session_id(&project, &branch);

        if let Some(existing) = self.db.get_session(&id).map_err(internal)? {
            // Same session key, explicitly different target: retarget.
            if target_branch.is_some() && existing.target_branch != target {
                self.db.set_target_branch(&id, &target).map_err(internal)?;
                return self.session(&id);
            }
            return Ok(existing);
        }

        let row = SessionRow::new(
            id,
            BackendKind::Local {
                repo_path,
                target_branch: target.clone(),
            },
            project,
            branch,
            target,
        );
        self.db.insert_session(&row).map_err(internal)?;
        Ok(row)
    }

    /// Get-or-create a session over a hosted pull request reference.
    pub fn get_or_create_hosted(
        &self,
        pr_ref: &str,
        auth_token_ref: Option<String>,
    ) -> Result<SessionRow, ServiceError> {
        let (owner, repo, number) = parse_pr_ref(pr_ref)
            .ok_or_else(|| ServiceError::BadRequest(format!("invalid PR reference: {pr_ref}")))?;

        let project = format!("{owner}/{repo}");
        let branch = format!("pr/{number}");
        let id = hash::session_id(&project, &branch);

        if let Some(existing) = self.db.get_session(&id).map_err(internal)? {
            return Ok(existing);
        }

        let row = SessionRow::new(
            id,
            BackendKind::Hosted {
                owner,
                repo,
                pr_number: number,
                auth_token_ref,
            },
            project,
            branch,
            String::new(),
        );
        self.db.insert_session(&row).map_err(internal)?;
        Ok(row)
    }

    pub fn session(&self, id: &str) -> Result<SessionRow, ServiceError> {
        self.db
            .get_session(id)
            .map_err(internal)?
            .ok_or_else(|| ServiceError::NotFound(format!("session {id} not found")))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionView>, ServiceError> {
        let rows = self.db.list_sessions().map_err(internal)?;
        rows.iter().map(|row| self.session_view(row)).collect()
    }

    pub fn delete_session(&self, id: &str) -> Result<(), ServiceError> {
        if !self.db.delete_session(id).map_err(internal)? {
            return Err(ServiceError::NotFound(format!("session {id} not found")));
        }
        self.watchers.remove(id);
        self.bus
            .emit(id, EventName::SessionUpdated, json!({ "session_id": id, "deleted": true }));
        Ok(())
    }

    pub fn set_target_branch(&self, id: &str, target: &str) -> Result<SessionRow, ServiceError> {
        if !self.db.set_target_branch(id, target).map_err(internal)? {
            return Err(ServiceError::NotFound(format!("session {id} not found")));
        }
        self.emit_session_updated(id);
        self.session(id)
    }

    // ── Backends ───────────────────────────────────────────────────────

    /// Instantiate the session's backend.
    pub fn backend_for(&self, session: &SessionRow) -> Result<Box<dyn ReviewBackend>, ServiceError> {
        match &session.backend {
            BackendKind::Local {
                repo_path,
                target_branch,
            } => Ok(Box::new(LocalBackend::new(
                repo_path.clone(),
                target_branch.clone(),
                session.id.clone(),
                tracked_extras(session),
                self.db.clone(),
            ))),
            BackendKind::Hosted {
                owner,
                repo,
                pr_number,
                auth_token_ref,
            } => {
                let var = auth_token_ref
                    .as_deref()
                    .unwrap_or(ENV_DEFAULT_API_TOKEN);
                let token = std::env::var(var).map_err(|_| {
                    ServiceError::Unauthorized(format!("hosted API token not set ({var})"))
                })?;
                Ok(Box::new(HostedPrBackend::new(
                    self.github_client(&token),
                    owner.clone(),
                    repo.clone(),
                    *pr_number,
                )))
            }
        }
    }

    // ── File-set overlays ──────────────────────────────────────────────

    /// Register paths on behalf of `agent_id`; returns the newly-added set.
    /// Paths already owned by another agent are silently kept.
    pub fn register_files(
        &self,
        session_id: &str,
        paths: &[String],
        agent_id: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let mut session = self.session(session_id)?;
        let mut added = Vec::new();
        for path in paths {
            if !session.registered_files.contains_key(path) {
                session
                    .registered_files
                    .insert(path.clone(), agent_id.to_string());
                added.push(path.clone());
            }
        }
        if !added.is_empty() {
            self.db.save_session_overlays(&session).map_err(internal)?;
            self.emit_session_updated(session_id);
        }
        Ok(added)
    }

    /// Unregister only the paths owned by `agent_id`; returns what was removed.
    pub fn unregister_files(
        &self,
        session_id: &str,
        paths: &[String],
        agent_id: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let mut session = self.session(session_id)?;
        let mut removed = Vec::new();
        for path in paths {
            if session.registered_files.get(path).map(String::as_str) == Some(agent_id) {
                session.registered_files.remove(path);
                removed.push(path.clone());
            }
        }
        if !removed.is_empty() {
            self.db.save_session_overlays(&session).map_err(internal)?;
            self.emit_session_updated(session_id);
        }
        Ok(removed)
    }

    /// Add a path by hand. Idempotent; never touches the other overlays.
    pub fn manual_add(&self, session_id: &str, path: &str) -> Result<(), ServiceError> {
        let mut session = self.session(session_id)?;
        if session.manual_additions.insert(path.to_string()) {
            self.db.save_session_overlays(&session).map_err(internal)?;
            self.emit_session_updated(session_id);
        }
        Ok(())
    }

    /// Remove a path: a manual addition is simply forgotten, anything else
    /// is shadowed through `manual_removals`.
    pub fn manual_remove(&self, session_id: &str, path: &str) -> Result<(), ServiceError> {
        let mut session = self.session(session_id)?;
        let changed = if session.manual_additions.remove(path) {
            true
        } else {
            session.manual_removals.insert(path.to_string())
        };
        if changed {
            self.db.save_session_overlays(&session).map_err(internal)?;
            self.emit_session_updated(session_id);
        }
        Ok(())
    }

    /// Undo a manual removal. Idempotent.
    pub fn restore_file(&self, session_id: &str, path: &str) -> Result<(), ServiceError> {
        let mut session = self.session(session_id)?;
        if session.manual_removals.remove(path) {
            self.db.save_session_overlays(&session).map_err(internal)?;
            self.emit_session_updated(session_id);
        }
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────────

    pub fn session_view(&self, session: &SessionRow) -> Result<SessionView, ServiceError> {
        let descriptor = match &session.backend {
            BackendKind::Local {
                repo_path,
                target_branch,
            } => json!({ "type": "local", "repo_path": repo_path, "target_branch": target_branch }),
            BackendKind::Hosted {
                owner,
                repo,
                pr_number,
                ..
            } => json!({ "type": "hosted", "owner": owner, "repo": repo, "pr_number": pr_number }),
        };
        Ok(SessionView {
            id: session.id.clone(),
            session_type: session.backend.session_type(),
            project: session.project.clone(),
            branch: session.branch.clone(),
            target_branch: session.target_branch.clone(),
            descriptor,
            registered_files: session.registered_files.clone(),
            manual_additions: session.manual_additions.clone(),
            manual_removals: session.manual_removals.clone(),
            unresolved_count: self.db.unresolved_count(&session.id).map_err(internal)?,
            created_at: session.created_at.clone(),
            updated_at: session.updated_at.clone(),
        })
    }

    /// The full review-state snapshot.
    pub async fn review_state(&self, session: &SessionRow) -> Result<ReviewState, ServiceError> {
        let backend = self.backend_for(session)?;
        let changed_files = backend.list_files().await?;
        let files = compose_files(session, &changed_files);
        let diff = backend.get_diff().await?;
        let parsed = parse_diff(&diff);
        let threads = self.threads_by_file(session, &*backend, None).await?;
        let unresolved_count = self.db.unresolved_count(&session.id).map_err(internal)?;
        let is_git_repo = match &session.backend {
            BackendKind::Local { repo_path, .. } => ops::is_git_repo(repo_path),
            BackendKind::Hosted { .. } => true,
        };

        Ok(ReviewState {
            session: self.session_view(session)?,
            files,
            changed_files,
            diff,
            parsed,
            threads,
            unresolved_count,
            is_git_repo,
        })
    }

    /// Threads grouped by file, staleness-annotated against the head side.
    pub async fn threads_by_file(
        &self,
        session: &SessionRow,
        backend: &dyn ReviewBackend,
        file: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<CommentThread>>, ServiceError> {
        let comments = backend.list_comments().await?;
        let comments: Vec<CommentRow> = match file {
            Some(f) => comments.into_iter().filter(|c| c.file == f).collect(),
            None => comments,
        };

        // Fetch the current content of every commented file once.
        let mut contents: BTreeMap<String, Option<Vec<String>>> = BTreeMap::new();
        for c in &comments {
            if !contents.contains_key(&c.file) {
                let lines = backend
                    .file_content(&c.file, DiffSide::Head, None)
                    .await?
                    .map(|text| text.lines().map(String::from).collect());
                contents.insert(c.file.clone(), lines);
            }
        }

        let threads = assemble_threads(&comments, |f| contents.get(f).cloned().flatten());

        let mut by_file: BTreeMap<String, Vec<CommentThread>> = BTreeMap::new();
        for thread in threads {
            by_file.entry(thread.root.file.clone()).or_default().push(thread);
        }
        Ok(by_file)
    }

    // ── Comments ───────────────────────────────────────────────────────

    /// Add a comment. Replies inherit `file` and `line` from their parent
    /// when omitted.
    pub async fn add_comment(
        &self,
        session_id: &str,
        params: AddComment,
    ) -> Result<CommentRow, ServiceError> {
        let session = self.session(session_id)?;
        let backend = self.backend_for(&session)?;

        let (file, line) = match &params.parent_id {
            Some(parent_id) => {
                let parent = self
                    .db
                    .get_comment(parent_id)
                    .map_err(internal)?
                    .filter(|p| p.session_id == session.id);
                match parent {
                    Some(parent) => (
                        params.file.unwrap_or(parent.file),
                        params.line.unwrap_or(parent.line),
                    ),
                    // Hosted threads are not mirrored into the store;
                    // require explicit placement there.
                    None if session.backend.session_type() == SessionType::Hosted => (
                        params.file.unwrap_or_default(),
                        params.line.unwrap_or(0),
                    ),
                    None => {
                        return Err(ServiceError::NotFound(format!(
                            "parent comment {parent_id} not found"
                        )));
                    }
                }
            }
            None => {
                let file = params.file.ok_or_else(|| {
                    ServiceError::BadRequest("file is required for a new thread".into())
                })?;
                let line = params.line.ok_or_else(|| {
                    ServiceError::BadRequest("line is required for a new thread".into())
                })?;
                (file, line)
            }
        };

        if line < 1 && params.parent_id.is_none() {
            return Err(ServiceError::BadRequest("line must be >= 1".into()));
        }

        let row = backend
            .add_comment(NewComment {
                file,
                line,
                side: params.side,
                body: params.text,
                author: params.author,
                parent_id: params.parent_id,
                line_content: params.line_content,
                context_before: params.context_before,
                context_after: params.context_after,
            })
            .await?;

        self.bus.emit(
            session_id,
            EventName::CommentAdded,
            json!({ "session_id": session_id, "comment_id": row.id, "file": row.file, "line": row.line }),
        );
        Ok(row)
    }

    /// Resolve or unresolve by comment id alone (REST surface). The comment
    /// must live in the store; hosted threads go through
    /// [`Engine::set_resolved_in_session`].
    pub async fn set_resolved(&self, comment_id: &str, resolved: bool) -> Result<(), ServiceError> {
        let comment = self
            .db
            .get_comment(comment_id)
            .map_err(internal)?
            .ok_or_else(|| ServiceError::NotFound(format!("comment {comment_id} not found")))?;
        let session = self.session(&comment.session_id)?;
        let backend = self.backend_for(&session)?;
        self.finish_resolve(&session.id, &*backend, comment_id, resolved).await
    }

    /// Resolve or unresolve when the caller knows the session (tool surface;
    /// required for hosted thread ids).
    pub async fn set_resolved_in_session(
        &self,
        session_id: &str,
        comment_id: &str,
        resolved: bool,
    ) -> Result<(), ServiceError> {
        let session = self.session(session_id)?;
        let backend = self.backend_for(&session)?;
        self.finish_resolve(&session.id, &*backend, comment_id, resolved).await
    }

    async fn finish_resolve(
        &self,
        session_id: &str,
        backend: &dyn ReviewBackend,
        comment_id: &str,
        resolved: bool,
    ) -> Result<(), ServiceError> {
        if resolved {
            backend.resolve_comment(comment_id).await?;
        } else {
            backend.unresolve_comment(comment_id).await?;
        }
        let name = if resolved {
            EventName::CommentResolved
        } else {
            EventName::CommentUnresolved
        };
        self.bus.emit(
            session_id,
            name,
            json!({ "session_id": session_id, "comment_id": comment_id }),
        );
        Ok(())
    }

    /// Delete a stored comment (descendants cascade).
    pub fn delete_comment(&self, comment_id: &str) -> Result<usize, ServiceError> {
        let comment = self
            .db
            .get_comment(comment_id)
            .map_err(internal)?
            .ok_or_else(|| ServiceError::NotFound(format!("comment {comment_id} not found")))?;
        let removed = self.db.delete_comment(comment_id).map_err(internal)?;
        self.bus.emit(
            &comment.session_id,
            EventName::CommentDeleted,
            json!({
                "session_id": comment.session_id,
                "comment_id": comment_id,
                "removed": removed,
            }),
        );
        Ok(removed)
    }

    /// Unresolved threads only — what an agent still owes answers to.
    pub async fn pending_feedback(
        &self,
        session: &SessionRow,
    ) -> Result<BTreeMap<String, Vec<CommentThread>>, ServiceError> {
        let backend = self.backend_for(session)?;
        let mut by_file = self.threads_by_file(session, &*backend, None).await?;
        for threads in by_file.values_mut() {
            threads.retain(|t| !t.root.resolved);
        }
        by_file.retain(|_, threads| !threads.is_empty());
        Ok(by_file)
    }

    fn emit_session_updated(&self, session_id: &str) {
        self.bus.emit(
            session_id,
            EventName::SessionUpdated,
            json!({ "session_id": session_id }),
        );
    }
}

/// Comment creation parameters from either caller surface.
#[derive(Debug, Clone, Default)]
pub struct AddComment {
    pub file: Option<String>,
    pub line: Option<i64>,
    pub side: Option<String>,
    pub text: String,
    pub author: String,
    pub parent_id: Option<String>,
    pub line_content: Option<String>,
    pub context_before: Option<Vec<String>>,
    pub context_after: Option<Vec<String>>,
}

fn internal(e: anyhow::Error) -> ServiceError {
    ServiceError::Internal(e.to_string())
}
