//! Session endpoints: lifecycle, diff, file content, context, and the
//! git staging surface.

use std::path::PathBuf;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use revline_backend::{DiffSide, extract_lines, publish};
use revline_core::BackendKind;
use revline_engine::{Engine, ReviewState, SessionView};
use revline_git_cli::{ChangedFile, FileDiff, ops, parse_diff};

use crate::error::ApiErr;
use crate::routes::guard_path;

// ── Lifecycle ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
}

/// GET /api/sessions
pub async fn list_sessions(State(engine): State<Engine>) -> Result<Json<SessionListResponse>, ApiErr> {
    let sessions = engine.list_sessions()?;
    Ok(Json(SessionListResponse { sessions }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(alias = "repo-path")]
    pub repo_path: Option<PathBuf>,
    #[serde(alias = "target-branch")]
    pub target_branch: Option<String>,
    /// Hosted alternative: a PR reference in any canonical form.
    #[serde(alias = "pr_url")]
    pub pr: Option<String>,
    pub auth_token_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: SessionView,
}

/// POST /api/sessions — get-or-create on a repo path or PR reference.
pub async fn create_session(
    State(engine): State<Engine>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ApiErr> {
    let row = match (&req.repo_path, &req.pr) {
        (Some(repo_path), None) => engine.get_or_create_local(repo_path, req.target_branch)?,
        (None, Some(pr)) => engine.get_or_create_hosted(pr, req.auth_token_ref)?,
        _ => {
            return Err(ApiErr::bad_request(
                "exactly one of repo_path or pr is required",
            ));
        }
    };
    Ok(Json(SessionResponse {
        session: engine.session_view(&row)?,
    }))
}

/// GET /api/sessions/:id — the full review-state snapshot.
pub async fn get_session(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<ReviewState>, ApiErr> {
    let session = engine.session(&id)?;
    Ok(Json(engine.review_state(&session).await?))
}

#[derive(Debug, Deserialize)]
pub struct PatchSessionRequest {
    #[serde(alias = "target-branch")]
    pub target_branch: Option<String>,
}

/// PATCH /api/sessions/:id — partial update, returns the fresh snapshot.
pub async fn patch_session(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(req): Json<PatchSessionRequest>,
) -> Result<Json<ReviewState>, ApiErr> {
    let session = match req.target_branch {
        Some(target) => engine.set_target_branch(&id, &target)?,
        None => engine.session(&id)?,
    };
    Ok(Json(engine.review_state(&session).await?))
}

/// DELETE /api/sessions/:id — cascades to comments, stops the watcher.
pub async fn delete_session(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    engine.delete_session(&id)?;
    Ok(Json(json!({ "ok": true })))
}

// ── Diff & content ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FileWithSize {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct DiffResponse {
    pub diff: String,
    pub parsed: Vec<FileDiff>,
    pub files: Vec<String>,
    pub files_with_size: Vec<FileWithSize>,
    pub changed_files: Vec<ChangedFile>,
    pub is_git_repo: bool,
}

/// GET /api/sessions/:id/diff
pub async fn get_diff(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<DiffResponse>, ApiErr> {
    let session = engine.session(&id)?;
    let backend = engine.backend_for(&session)?;

    let changed_files = backend.list_files().await?;
    let files = revline_engine::session::compose_files(&session, &changed_files);
    let diff = backend.get_diff().await?;
    let parsed = parse_diff(&diff);

    let (files_with_size, is_git_repo) = match &session.backend {
        BackendKind::Local { repo_path, .. } => {
            let sizes = files
                .iter()
                .filter_map(|f| {
                    let full = ops::resolve_in_repo(repo_path, f)?;
                    let size = std::fs::metadata(full).ok()?.len();
                    Some(FileWithSize {
                        path: f.clone(),
                        size,
                    })
                })
                .collect();
            (sizes, ops::is_git_repo(repo_path))
        }
        BackendKind::Hosted { .. } => (Vec::new(), true),
    };

    Ok(Json(DiffResponse {
        diff,
        parsed,
        files,
        files_with_size,
        changed_files,
        is_git_repo,
    }))
}

/// GET /api/sessions/:id/file-content/:path — one file's diff on demand.
pub async fn get_file_diff(
    State(engine): State<Engine>,
    Path((id, raw_path)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let file = guard_path(&session, &raw_path)?;
    let backend = engine.backend_for(&session)?;

    let diff = backend.get_diff().await?;
    let parsed: Vec<FileDiff> = parse_diff(&diff)
        .into_iter()
        .filter(|d| {
            d.file_b.as_deref() == Some(file.as_str())
                || d.file_a.as_deref() == Some(file.as_str())
        })
        .collect();
    let text = revline_git_cli::serialize_diff(&parsed);

    Ok(Json(json!({ "file": file, "diff": text, "parsed": parsed })))
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Serialize)]
pub struct ContextLine {
    pub line: u32,
    pub content: String,
}

/// GET /api/sessions/:id/context/:path?from=N&to=M — 1-indexed inclusive,
/// clamped to the file bounds (`from = 0` clamps to 1).
pub async fn get_context(
    State(engine): State<Engine>,
    Path((id, raw_path)): Path<(String, String)>,
    Query(q): Query<ContextQuery>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let file = guard_path(&session, &raw_path)?;

    if q.from > q.to {
        return Err(ApiErr::bad_request("from must be <= to"));
    }
    let from = q.from.max(1);

    let backend = engine.backend_for(&session)?;
    let content = backend
        .file_content(&file, DiffSide::Head, None)
        .await?
        .ok_or_else(|| ApiErr::not_found(format!("file {file} not found")))?;

    let lines: Vec<ContextLine> = extract_lines(&content, from, q.to)
        .map(|snippet| {
            snippet
                .lines()
                .enumerate()
                .map(|(i, content)| ContextLine {
                    line: from + i as u32,
                    content: content.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Json(json!({ "file": file, "from": from, "to": q.to, "lines": lines })))
}

// ── Git surface ────────────────────────────────────────────────────────

fn local_repo(session: &revline_store::SessionRow) -> Result<PathBuf, ApiErr> {
    match &session.backend {
        BackendKind::Local { repo_path, .. } => Ok(repo_path.clone()),
        BackendKind::Hosted { .. } => Err(ApiErr::bad_request(
            "this operation requires a local session",
        )),
    }
}

/// GET /api/sessions/:id/branches
pub async fn get_branches(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let repo = local_repo(&session)?;
    Ok(Json(json!({
        "branches": ops::list_branches(&repo),
        "current": ops::current_branch(&repo),
        "default": ops::detect_default_branch(&repo),
    })))
}

/// GET /api/sessions/:id/staged
pub async fn get_staged(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let repo = local_repo(&session)?;
    Ok(Json(json!({
        "staged": ops::staged_files(&repo),
        "unstaged": ops::unstaged_files(&repo),
    })))
}

/// GET /api/sessions/:id/untracked
pub async fn get_untracked(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let repo = local_repo(&session)?;
    Ok(Json(json!({ "untracked": ops::untracked_files(&repo) })))
}

#[derive(Debug, Deserialize)]
pub struct FileBody {
    #[serde(alias = "path")]
    pub file: String,
}

/// POST /api/sessions/:id/stage — `git add` one file.
pub async fn stage_file(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(body): Json<FileBody>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let file = guard_path(&session, &body.file)?;
    let repo = local_repo(&session)?;
    if !ops::stage_file(&repo, &file) {
        return Err(ApiErr::bad_request(format!("could not stage {file}")));
    }
    Ok(Json(json!({ "ok": true, "staged": file })))
}

/// POST /api/sessions/:id/manual-files — add a file by hand.
pub async fn add_manual_file(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(body): Json<FileBody>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let file = guard_path(&session, &body.file)?;
    engine.manual_add(&id, &file)?;
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /api/sessions/:id/manual-files — remove a file from the review.
pub async fn remove_manual_file(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(body): Json<FileBody>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let file = guard_path(&session, &body.file)?;
    engine.manual_remove(&id, &file)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/sessions/:id/restore-file — undo a manual removal.
pub async fn restore_file(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(body): Json<FileBody>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let session = engine.session(&id)?;
    let file = guard_path(&session, &body.file)?;
    engine.restore_file(&id, &file)?;
    Ok(Json(json!({ "ok": true })))
}

// ── Submit ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

/// POST /api/sessions/:id/submit — push through the gate and front the
/// branch with a PR when a hosted token is available.
pub async fn submit_review(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<publish::PushOutcome>, ApiErr> {
    crate::routes::require_write_scope(&engine, &headers)?;
    let session = engine.session(&id)?;
    let repo = local_repo(&session)?;

    let client = std::env::var(revline_core::config::ENV_DEFAULT_API_TOKEN)
        .ok()
        .map(|token| engine.github_client(&token));

    let outcome = publish::submit_review(
        &repo,
        &req.remote,
        &engine.config.push_whitelist,
        client.as_ref(),
        &session.target_branch,
        &req.title,
        &req.body,
    )
    .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_core::ServerConfig;
    use revline_git_cli::test_utils::{init_test_repo, write_file};
    use revline_store::Db;

    fn engine() -> Engine {
        Engine::new(Db::open_in_memory().unwrap(), ServerConfig::default())
    }

    #[tokio::test]
    async fn create_then_diff_shows_the_uncommitted_edit() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        write_file(tmp.path(), "README.md", "hello\nworld\nhi\n");
        let engine = engine();

        let Json(created) = create_session(
            State(engine.clone()),
            Json(CreateSessionRequest {
                repo_path: Some(tmp.path().to_path_buf()),
                target_branch: None,
                pr: None,
                auth_token_ref: None,
            }),
        )
        .await
        .unwrap();
        let id = created.session.id.clone();

        let Json(diff) = get_diff(State(engine.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(diff.parsed[0].file_b.as_deref(), Some("README.md"));
        let hunk = &diff.parsed[0].hunks[0];
        assert!(hunk.lines.iter().any(|l| l == "+hi"));
        assert!(diff.is_git_repo);
        assert_eq!(diff.files_with_size[0].path, "README.md");

        let Json(state) = get_session(State(engine), Path(id)).await.unwrap();
        assert_eq!(state.files, vec!["README.md"]);
    }

    #[tokio::test]
    async fn create_rejects_missing_paths_and_ambiguous_bodies() {
        let engine = engine();
        let err = create_session(
            State(engine.clone()),
            Json(CreateSessionRequest {
                repo_path: Some(PathBuf::from("/definitely/not/here")),
                target_branch: None,
                pr: None,
                auth_token_ref: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.status_code(), 400);

        let err = create_session(
            State(engine),
            Json(CreateSessionRequest {
                repo_path: None,
                target_branch: None,
                pr: None,
                auth_token_ref: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.status_code(), 400);
    }

    #[tokio::test]
    async fn context_validates_clamps_and_guards() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        write_file(tmp.path(), "three.txt", "one\ntwo\nthree\n");
        let engine = engine();
        let session = engine.get_or_create_local(tmp.path(), None).unwrap();

        let Json(ctx) = get_context(
            State(engine.clone()),
            Path((session.id.clone(), "three.txt".into())),
            Query(ContextQuery { from: 0, to: 99 }),
        )
        .await
        .unwrap();
        assert_eq!(ctx["from"], 1);
        let lines = ctx["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["line"], 1);
        assert_eq!(lines[2]["content"], "three");

        let err = get_context(
            State(engine.clone()),
            Path((session.id.clone(), "three.txt".into())),
            Query(ContextQuery { from: 3, to: 2 }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.status_code(), 400);

        // E6: encoded traversal is rejected with a message naming it
        let err = get_context(
            State(engine),
            Path((session.id, "..%2F..%2Fetc%2Fpasswd".into())),
            Query(ContextQuery { from: 1, to: 1 }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.status_code(), 400);
        assert!(err.0.message().contains("path traversal"));
    }

    #[tokio::test]
    async fn manual_file_endpoints_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let engine = engine();
        let session = engine.get_or_create_local(tmp.path(), None).unwrap();
        let id = session.id.clone();

        let effective = |engine: &Engine, id: &str| {
            revline_engine::session::effective_files(&engine.session(id).unwrap())
        };

        add_manual_file(
            State(engine.clone()),
            Path(id.clone()),
            Json(FileBody { file: "extra.rs".into() }),
        )
        .await
        .unwrap();
        assert!(effective(&engine, &id).contains(&"extra.rs".to_string()));

        remove_manual_file(
            State(engine.clone()),
            Path(id.clone()),
            Json(FileBody { file: "extra.rs".into() }),
        )
        .await
        .unwrap();
        assert!(!effective(&engine, &id).contains(&"extra.rs".to_string()));

        // shadow a backend file, then restore it
        remove_manual_file(
            State(engine.clone()),
            Path(id.clone()),
            Json(FileBody { file: "README.md".into() }),
        )
        .await
        .unwrap();
        restore_file(
            State(engine.clone()),
            Path(id.clone()),
            Json(FileBody { file: "README.md".into() }),
        )
        .await
        .unwrap();
        let s = engine.session(&id).unwrap();
        assert!(s.manual_removals.is_empty());
    }

    #[tokio::test]
    async fn git_surface_endpoints() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        write_file(tmp.path(), "README.md", "edited\n");
        let engine = engine();
        let session = engine.get_or_create_local(tmp.path(), None).unwrap();
        let id = session.id.clone();

        let Json(branches) = get_branches(State(engine.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(branches["current"], "main");

        let Json(before) = get_staged(State(engine.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(before["unstaged"][0], "README.md");

        stage_file(
            State(engine.clone()),
            Path(id.clone()),
            Json(FileBody { file: "README.md".into() }),
        )
        .await
        .unwrap();
        let Json(after) = get_staged(State(engine.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(after["staged"][0], "README.md");

        write_file(tmp.path(), "loose.txt", "x\n");
        let Json(untracked) = get_untracked(State(engine), Path(id)).await.unwrap();
        assert_eq!(untracked["untracked"][0], "loose.txt");
    }

    #[tokio::test]
    async fn patch_retargets_and_delete_cascades() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let engine = engine();
        let session = engine.get_or_create_local(tmp.path(), None).unwrap();
        let id = session.id.clone();

        let Json(state) = patch_session(
            State(engine.clone()),
            Path(id.clone()),
            Json(PatchSessionRequest { target_branch: Some("main".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(state.session.target_branch, "main");

        delete_session(State(engine.clone()), Path(id.clone())).await.unwrap();
        let err = get_session(State(engine), Path(id)).await.unwrap_err();
        assert_eq!(err.0.status_code(), 404);
    }
}
