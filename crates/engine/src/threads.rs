//! Thread assembly and staleness annotation.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use revline_store::CommentRow;

use crate::staleness::{Staleness, classify};

/// A comment as exposed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub file: String,
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    pub text: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_content: Option<String>,
    pub resolved: bool,
    pub staleness: Staleness,
    pub created_at: String,
    pub updated_at: String,
}

/// A top-level comment with its transitively reachable replies, flattened
/// in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub root: CommentView,
    pub replies: Vec<CommentView>,
}

fn view(row: &CommentRow, staleness: Staleness) -> CommentView {
    CommentView {
        id: row.id.clone(),
        parent_id: row.parent_id.clone(),
        file: row.file.clone(),
        line: row.line,
        side: row.side.clone(),
        text: row.body.clone(),
        author: row.author.clone(),
        line_content: row.line_content.clone(),
        resolved: row.resolved,
        staleness,
        created_at: row.created_at.clone(),
        updated_at: row.updated_at.clone(),
    }
}

/// Assemble flat comments (creation order) into threads.
///
/// Single pass: a comment without a known parent id starts a thread; every
/// other comment lands in the reply list of the thread its ancestor roots.
/// Replies to a missing parent are dropped — a recoverable state, not an
/// error. Staleness is computed per root against the file's current lines
/// (`file_lines(file)`), and replies inherit the root's anchor verdict.
pub fn assemble_threads(
    comments: &[CommentRow],
    mut file_lines: impl FnMut(&str) -> Option<Vec<String>>,
) -> Vec<CommentThread> {
    let mut threads: Vec<CommentThread> = Vec::new();
    // comment id → index of the thread that roots it
    let mut root_of: HashMap<&str, usize> = HashMap::new();
    // file → current lines, fetched once per file
    let mut lines_cache: HashMap<String, Option<Vec<String>>> = HashMap::new();

    for row in comments {
        match row.parent_id.as_deref() {
            None => {
                let lines = lines_cache
                    .entry(row.file.clone())
                    .or_insert_with(|| file_lines(&row.file));
                let staleness = classify(row, lines.as_deref());
                root_of.insert(&row.id, threads.len());
                threads.push(CommentThread {
                    root: view(row, staleness),
                    replies: Vec::new(),
                });
            }
            Some(parent) => match root_of.get(parent).copied() {
                Some(idx) => {
                    let staleness = threads[idx].root.staleness;
                    root_of.insert(&row.id, idx);
                    threads[idx].replies.push(view(row, staleness));
                }
                None => {
                    debug!("dropping orphaned reply {} (parent {parent} missing)", row.id);
                }
            },
        }
    }

    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_core::hash::line_content_hash;
    use revline_core::time::now_iso;

    fn row(id: &str, parent: Option<&str>, content: Option<&str>) -> CommentRow {
        let now = now_iso();
        CommentRow {
            id: id.into(),
            session_id: "s".into(),
            parent_id: parent.map(String::from),
            file: "a.ts".into(),
            line: 1,
            side: None,
            body: format!("body {id}"),
            author: "u".into(),
            line_content: content.map(String::from),
            context_before: None,
            context_after: None,
            line_content_hash: line_content_hash(content),
            resolved: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn roots_and_replies_in_creation_order() {
        let comments = vec![
            row("r1", None, Some("anchored")),
            row("c1", Some("r1"), None),
            row("r2", None, Some("anchored")),
            row("c2", Some("r1"), None),
        ];
        let threads = assemble_threads(&comments, |_| Some(vec!["anchored".into()]));

        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].root.id, "r1");
        assert_eq!(threads[0].replies.len(), 2);
        assert_eq!(threads[0].replies[0].id, "c1");
        assert_eq!(threads[0].replies[1].id, "c2");
        assert!(threads[1].replies.is_empty());
    }

    #[test]
    fn nested_replies_land_in_the_root_thread() {
        let comments = vec![
            row("r1", None, None),
            row("c1", Some("r1"), None),
            row("c2", Some("c1"), None),
        ];
        let threads = assemble_threads(&comments, |_| None);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].replies.len(), 2);

        // every comment with an existing ancestor is accounted for
        let total: usize = threads.iter().map(|t| t.replies.len() + 1).sum();
        assert_eq!(total, comments.len());
    }

    #[test]
    fn orphaned_replies_are_dropped() {
        let comments = vec![row("r1", None, None), row("lost", Some("ghost"), None)];
        let threads = assemble_threads(&comments, |_| None);
        assert_eq!(threads.len(), 1);
        assert!(threads[0].replies.is_empty());
    }

    #[test]
    fn replies_inherit_root_staleness() {
        let comments = vec![row("r1", None, Some("gone")), row("c1", Some("r1"), None)];
        let threads = assemble_threads(&comments, |_| Some(vec!["different".into()]));
        assert_eq!(threads[0].root.staleness, Staleness::Changed);
        assert_eq!(threads[0].replies[0].staleness, Staleness::Changed);
    }

    #[test]
    fn staleness_is_fresh_when_anchor_survives() {
        let comments = vec![row("r1", None, Some("kept"))];
        let threads = assemble_threads(&comments, |_| Some(vec!["kept".into()]));
        assert_eq!(threads[0].root.staleness, Staleness::Fresh);
    }
}
