//! Comment anchor freshness.
//!
//! A comment remembers the content of the line it was written against. As
//! the file drifts we classify the anchor: the line still hashes the same
//! (`fresh`), its neighbourhood still contains the captured context
//! (`shifted`), or nothing matches any more (`changed`).

use serde::Serialize;

use revline_core::hash::sha256_hex;
use revline_store::CommentRow;

/// Lines scanned on each side of the recorded anchor when looking for a
/// shifted match.
pub const SHIFT_WINDOW: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Staleness {
    Fresh,
    Shifted,
    Changed,
}

/// Classify a comment anchor against the file's current lines.
///
/// `file_lines` is `None` when the file no longer exists — always `changed`.
/// Comments that never captured content (hosted imports) have an empty hash
/// and report `fresh`: there is nothing to compare.
pub fn classify(comment: &CommentRow, file_lines: Option<&[String]>) -> Staleness {
    if comment.line_content_hash.is_empty() {
        return Staleness::Fresh;
    }
    let Some(lines) = file_lines else {
        return Staleness::Changed;
    };

    let idx = comment.line - 1;
    if idx >= 0 && (idx as usize) < lines.len() {
        if sha256_hex(lines[idx as usize].as_bytes()) == comment.line_content_hash {
            return Staleness::Fresh;
        }
    }

    if has_shifted_match(comment, lines) {
        Staleness::Shifted
    } else {
        Staleness::Changed
    }
}

/// Does any anchor line (the captured line or its context) appear within
/// [`SHIFT_WINDOW`] lines of the recorded position?
fn has_shifted_match(comment: &CommentRow, lines: &[String]) -> bool {
    let mut anchors: Vec<&str> = Vec::new();
    if let Some(content) = comment.line_content.as_deref() {
        if !content.is_empty() {
            anchors.push(content);
        }
    }
    for ctx in [&comment.context_before, &comment.context_after] {
        if let Some(ctx) = ctx {
            anchors.extend(ctx.iter().map(String::as_str).filter(|l| !l.is_empty()));
        }
    }
    if anchors.is_empty() {
        return false;
    }

    let hi_bound = comment.line - 1 + SHIFT_WINDOW;
    if hi_bound < 0 || lines.is_empty() {
        return false;
    }
    let lo = (comment.line - 1 - SHIFT_WINDOW).max(0) as usize;
    let hi = (hi_bound as usize).min(lines.len() - 1);
    if lo > hi {
        return false;
    }

    lines[lo..=hi]
        .iter()
        .any(|line| anchors.iter().any(|a| a == line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_core::hash::line_content_hash;
    use revline_core::time::now_iso;

    fn comment(line: i64, content: Option<&str>, before: Option<Vec<&str>>) -> CommentRow {
        let now = now_iso();
        CommentRow {
            id: "c".into(),
            session_id: "s".into(),
            parent_id: None,
            file: "a.ts".into(),
            line,
            side: None,
            body: "b".into(),
            author: "u".into(),
            line_content: content.map(String::from),
            context_before: before.map(|v| v.into_iter().map(String::from).collect()),
            context_after: None,
            line_content_hash: line_content_hash(content),
            resolved: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unchanged_line_is_fresh() {
        let file = lines(&["a", "b", "c"]);
        let c = comment(2, Some("b"), None);
        assert_eq!(classify(&c, Some(&file)), Staleness::Fresh);
    }

    #[test]
    fn moved_line_within_window_is_shifted() {
        // "b" moved from line 2 to line 4
        let file = lines(&["a", "x", "y", "b", "c"]);
        let c = comment(2, Some("b"), None);
        assert_eq!(classify(&c, Some(&file)), Staleness::Shifted);
    }

    #[test]
    fn context_match_within_window_is_shifted() {
        let file = lines(&["intro", "rewritten", "outro"]);
        let c = comment(2, Some("original"), Some(vec!["intro"]));
        assert_eq!(classify(&c, Some(&file)), Staleness::Shifted);
    }

    #[test]
    fn rewritten_neighbourhood_is_changed() {
        let file = lines(&["p", "q", "r"]);
        let c = comment(2, Some("gone"), Some(vec!["also-gone"]));
        assert_eq!(classify(&c, Some(&file)), Staleness::Changed);
    }

    #[test]
    fn match_outside_window_is_changed() {
        let mut raw = vec!["filler"; 20];
        raw[15] = "needle";
        let file = lines(&raw);
        // anchor at line 1, needle at line 16 — beyond the ±5 window
        let c = comment(1, Some("needle"), None);
        assert_eq!(classify(&c, Some(&file)), Staleness::Changed);
    }

    #[test]
    fn deleted_file_is_changed() {
        let c = comment(3, Some("x"), None);
        assert_eq!(classify(&c, None), Staleness::Changed);
    }

    #[test]
    fn uncaptured_anchor_is_fresh() {
        let mut c = comment(1, None, None);
        c.line_content_hash = String::new();
        assert_eq!(classify(&c, None), Staleness::Fresh);
    }

    #[test]
    fn line_past_eof_with_no_match_is_changed() {
        let file = lines(&["only"]);
        let c = comment(9, Some("missing"), None);
        assert_eq!(classify(&c, Some(&file)), Staleness::Changed);
    }
}
