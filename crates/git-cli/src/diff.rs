//! Unified diff parsing, independent of where the text came from.
//!
//! The parser is tolerant: malformed or empty input yields an empty vec,
//! unknown header lines (index, mode, similarity) are skipped. Hunk lines
//! keep their leading `+` / `-` / ` ` marker.

use serde::{Deserialize, Serialize};

/// One file's diff. `None` on a side means `/dev/null` (created/deleted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file_a: Option<String>,
    pub file_b: Option<String>,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// Content lines with their leading marker preserved.
    pub lines: Vec<String>,
}

/// Parse unified diff text into per-file diffs.
pub fn parse_diff(input: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;

    for line in input.lines() {
        if line.starts_with("diff --git ") {
            if let Some(f) = current.take() {
                files.push(f);
            }
            current = Some(FileDiff {
                file_a: None,
                file_b: None,
                hunks: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(f) = current.as_mut() {
                f.file_a = parse_file_name(rest, "a/");
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(f) = current.as_mut() {
                f.file_b = parse_file_name(rest, "b/");
            }
        } else if line.starts_with("@@ ") {
            let Some(f) = current.as_mut() else { continue };
            if let Some(hunk) = parse_hunk_header(line) {
                f.hunks.push(hunk);
            }
        } else if let Some(f) = current.as_mut() {
            if f.hunks.is_empty() {
                // index/mode/similarity headers between file header and hunks
                continue;
            }
            if line.starts_with('+')
                || line.starts_with('-')
                || line.starts_with(' ')
                || line.starts_with('\\')
                || line.is_empty()
            {
                let hunk = f.hunks.last_mut().expect("hunks is non-empty");
                // An entirely empty line inside a hunk is a context line
                // whose trailing space was stripped in transit.
                if line.is_empty() {
                    hunk.lines.push(" ".to_string());
                } else {
                    hunk.lines.push(line.to_string());
                }
            }
        }
    }

    if let Some(f) = current.take() {
        files.push(f);
    }
    files
}

/// Re-serialise parsed diffs into unified diff text.
///
/// Output is canonical: `diff --git` + `---`/`+++` headers + hunks. Noise
/// headers (index, mode) from the original are not reproduced, so
/// `parse(serialize(parse(x))) == parse(x)` holds rather than byte equality.
pub fn serialize_diff(diffs: &[FileDiff]) -> String {
    let mut out = String::new();
    for d in diffs {
        let a_name = d.file_a.as_deref().unwrap_or("dev/null");
        let b_name = d.file_b.as_deref().or(d.file_a.as_deref()).unwrap_or("dev/null");
        out.push_str(&format!("diff --git a/{a_name} b/{b_name}\n"));
        match &d.file_a {
            Some(f) => out.push_str(&format!("--- a/{f}\n")),
            None => out.push_str("--- /dev/null\n"),
        }
        match &d.file_b {
            Some(f) => out.push_str(&format!("+++ b/{f}\n")),
            None => out.push_str("+++ /dev/null\n"),
        }
        for h in &d.hunks {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                h.old_start, h.old_count, h.new_start, h.new_count
            ));
            for line in &h.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

/// `a/src/main.rs` → `Some("src/main.rs")`, `/dev/null` → `None`.
fn parse_file_name(raw: &str, prefix: &str) -> Option<String> {
    let name = raw.split('\t').next().unwrap_or(raw).trim();
    if name == "/dev/null" {
        return None;
    }
    Some(
        name.strip_prefix(prefix)
            .unwrap_or(name)
            .to_string(),
    )
}

/// `@@ -3,2 +3,4 @@ optional section` → hunk with empty lines.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let body = line.strip_prefix("@@ ")?;
    let end = body.find(" @@")?;
    let ranges = &body[..end];
    let mut parts = ranges.split(' ');

    let (old_start, old_count) = parse_range(parts.next()?, '-')?;
    let (new_start, new_count) = parse_range(parts.next()?, '+')?;

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

/// `-3,2` → `(3, 2)`; a bare `-3` means count 1.
fn parse_range(raw: &str, sign: char) -> Option<(u32, u32)> {
    let raw = raw.strip_prefix(sign)?;
    match raw.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((raw.parse().ok()?, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
diff --git a/README.md b/README.md
index 3b18e51..9daeafb 100644
--- a/README.md
+++ b/README.md
@@ -1,3 +1,3 @@
 intro
-hello
+hi
 outro
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+a
+b
";

    #[test]
    fn parses_files_and_hunks() {
        let files = parse_diff(SAMPLE);
        assert_eq!(files.len(), 2);

        let readme = &files[0];
        assert_eq!(readme.file_a.as_deref(), Some("README.md"));
        assert_eq!(readme.file_b.as_deref(), Some("README.md"));
        assert_eq!(readme.hunks.len(), 1);
        let h = &readme.hunks[0];
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (1, 3, 1, 3));
        assert_eq!(h.lines, vec![" intro", "-hello", "+hi", " outro"]);

        let created = &files[1];
        assert_eq!(created.file_a, None);
        assert_eq!(created.file_b.as_deref(), Some("new.txt"));
        assert_eq!(created.hunks[0].new_count, 2);
    }

    #[test]
    fn empty_and_malformed_input_yield_nothing() {
        assert!(parse_diff("").is_empty());
        assert!(parse_diff("not a diff at all\njust text\n").is_empty());
        // file header with a broken hunk header parses to a file without hunks
        let files = parse_diff("diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ garbage @@\n");
        assert_eq!(files.len(), 1);
        assert!(files[0].hunks.is_empty());
    }

    #[test]
    fn bare_range_defaults_to_count_one() {
        let input = "diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-x\n+y\n";
        let files = parse_diff(input);
        let h = &files[0].hunks[0];
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (1, 1, 1, 1));
    }

    #[test]
    fn hunk_header_section_text_is_ignored() {
        let input = "diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -4,2 +4,3 @@ fn main() {\n y\n+z\n x\n";
        let files = parse_diff(input);
        assert_eq!(files[0].hunks[0].new_count, 3);
        assert_eq!(files[0].hunks[0].lines.len(), 3);
    }

    #[test]
    fn serialise_round_trip_is_stable() {
        let parsed = parse_diff(SAMPLE);
        let once = serialize_diff(&parsed);
        let reparsed = parse_diff(&once);
        assert_eq!(parsed, reparsed);
        assert_eq!(once, serialize_diff(&reparsed));
    }
}
