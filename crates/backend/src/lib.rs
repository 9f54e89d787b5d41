//! The backend protocol: the narrow capability surface a review session
//! draws its diff, file contents, and comment transport from.
//!
//! Two implementations exist — [`local::LocalBackend`] over a git working
//! tree and [`hosted::HostedPrBackend`] over a hosted pull request — and the
//! session manager treats them uniformly through [`ReviewBackend`].

pub mod hosted;
pub mod local;
pub mod pr_ref;
pub mod publish;
pub mod push_gate;
pub mod rate_limit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use revline_core::{ServiceError, SessionType};
use revline_git_cli::ChangedFile;
use revline_store::CommentRow;

pub use hosted::{GithubClient, HostedPrBackend};
pub use local::LocalBackend;
pub use pr_ref::parse_pr_ref;
pub use publish::{PrState, PushOutcome};
pub use push_gate::{PushTarget, check_push, normalize_remote, pattern_matches, validate_push};
pub use rate_limit::RateLimit;

/// Which side of the diff a file content request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSide {
    /// The merge base / PR base commit.
    Base,
    /// The working tree / PR head.
    Head,
}

/// Parameters for a new comment. `file` and `line` are already resolved —
/// reply inheritance from the parent happens in the session manager.
#[derive(Debug, Clone, Default)]
pub struct NewComment {
    pub file: String,
    pub line: i64,
    pub side: Option<String>,
    pub body: String,
    pub author: String,
    pub parent_id: Option<String>,
    pub line_content: Option<String>,
    pub context_before: Option<Vec<String>>,
    pub context_after: Option<Vec<String>>,
}

/// Capability surface every backend satisfies.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    /// Variant-prefixed id: `local:<hash>` or `hosted:owner/repo:number`.
    fn session_id(&self) -> String;

    fn session_type(&self) -> SessionType;

    /// Display descriptor for clients.
    fn descriptor(&self) -> serde_json::Value;

    async fn list_files(&self) -> Result<Vec<ChangedFile>, ServiceError>;

    async fn get_diff(&self) -> Result<String, ServiceError>;

    /// `None` when the file does not exist on the requested side.
    async fn file_content(
        &self,
        file: &str,
        side: DiffSide,
        range: Option<(u32, u32)>,
    ) -> Result<Option<String>, ServiceError>;

    /// Comments in the backend-native store, normalised to [`CommentRow`].
    async fn list_comments(&self) -> Result<Vec<CommentRow>, ServiceError>;

    async fn add_comment(&self, new: NewComment) -> Result<CommentRow, ServiceError>;

    async fn resolve_comment(&self, id: &str) -> Result<(), ServiceError>;

    async fn unresolve_comment(&self, id: &str) -> Result<(), ServiceError>;
}

/// Lines `from..=to` of `content`, 1-indexed inclusive. Out-of-range bounds
/// clamp; a clamped start past the end (or `from > to`) yields `None`.
pub fn extract_lines(content: &str, from: u32, to: u32) -> Option<String> {
    if from > to {
        return None;
    }
    let lines: Vec<&str> = content.lines().collect();
    let start = from.max(1) as usize;
    let end = (to as usize).min(lines.len());
    if start > end {
        return None;
    }
    Some(lines[start - 1..end].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_lines_exact_and_clamped() {
        let content = "one\ntwo\nthree\nfour";
        assert_eq!(extract_lines(content, 2, 3).as_deref(), Some("two\nthree"));
        assert_eq!(extract_lines(content, 1, 4).as_deref(), Some(content));
        // from = 0 clamps to 1, to past EOF clamps to the last line
        assert_eq!(extract_lines(content, 0, 99).as_deref(), Some(content));
    }

    #[test]
    fn extract_lines_degenerate_ranges_are_none() {
        let content = "one\ntwo";
        assert_eq!(extract_lines(content, 3, 2), None);
        assert_eq!(extract_lines(content, 5, 9), None);
        assert_eq!(extract_lines("", 1, 1), None);
    }
}
