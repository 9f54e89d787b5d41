//! Comment endpoints: threaded listing, creation, resolve lifecycle.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use revline_engine::session::AddComment;
use revline_engine::{CommentThread, Engine};

use crate::error::ApiErr;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub file: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentsResponse {
    pub comments: Vec<CommentThread>,
}

/// GET /api/sessions/:id/comments?file=… — thread-assembled and
/// staleness-annotated.
pub async fn list_comments(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<CommentsResponse>, ApiErr> {
    let session = engine.session(&id)?;
    let backend = engine.backend_for(&session)?;
    let by_file = engine
        .threads_by_file(&session, &*backend, q.file.as_deref())
        .await?;

    let comments = by_file.into_values().flatten().collect();
    Ok(Json(CommentsResponse { comments }))
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
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

/// POST /api/sessions/:id/comments — replies inherit `file`/`line` from
/// their parent when omitted.
pub async fn create_comment(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let row = engine
        .add_comment(
            &id,
            AddComment {
                file: req.file,
                line: req.line,
                side: req.side,
                text: req.text,
                author: req.author,
                parent_id: req.parent_id,
                line_content: req.line_content,
                context_before: req.context_before,
                context_after: req.context_after,
            },
        )
        .await?;

    Ok(Json(json!({ "comment": {
        "id": row.id,
        "file": row.file,
        "line": row.line,
        "text": row.body,
        "author": row.author,
        "parent_id": row.parent_id,
        "resolved": row.resolved,
        "created_at": row.created_at,
    }})))
}

#[derive(Debug, Deserialize, Default)]
pub struct ResolveBody {
    pub author: Option<String>,
}

/// PATCH /api/comments/:id/resolve — body `{author}` is informational and
/// optional.
pub async fn resolve_comment(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let author = serde_json::from_str::<ResolveBody>(&body)
        .unwrap_or_default()
        .author;
    tracing::debug!("comment {id} resolved by {author:?}");
    engine.set_resolved(&id, true).await?;
    Ok(Json(json!({ "ok": true, "resolved": true })))
}

/// PATCH /api/comments/:id/unresolve
pub async fn unresolve_comment(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let _ = serde_json::from_str::<ResolveBody>(&body).unwrap_or_default();
    engine.set_resolved(&id, false).await?;
    Ok(Json(json!({ "ok": true, "resolved": false })))
}

/// DELETE /api/comments/:id — cascades to descendants.
pub async fn delete_comment(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let removed = engine.delete_comment(&id)?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}
