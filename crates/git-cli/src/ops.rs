//! Git subprocess operations.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Branch name reported for directories that are not git repositories.
pub const WORKING_BRANCH: &str = "working";

/// Run git with `args` inside `repo`, returning stdout on success.
fn run_git(repo: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .ok()?;

    if !output.status.success() {
        debug!(
            "git {:?} in {} failed: {}",
            args,
            repo.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// File change status parsed from `git diff --name-status` / `ls-files`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

/// One changed path relative to the merge base with the target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
}

pub fn is_git_repo(path: &Path) -> bool {
    run_git(path, &["rev-parse", "--is-inside-work-tree"])
        .map(|out| out.trim() == "true")
        .unwrap_or(false)
}

/// The checked-out branch, or [`WORKING_BRANCH`] for non-repos.
pub fn current_branch(path: &Path) -> String {
    run_git(path, &["rev-parse", "--abbrev-ref", "HEAD"])
        .map(|out| out.trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| WORKING_BRANCH.to_string())
}

/// Prefer the remote HEAD, then `main`, then `master`, then the first local
/// branch. Repos with no branches at all get `main`.
pub fn detect_default_branch(path: &Path) -> String {
    if let Some(head) = run_git(path, &["symbolic-ref", "refs/remotes/origin/HEAD"]) {
        if let Some(branch) = head.trim().strip_prefix("refs/remotes/origin/") {
            return branch.to_string();
        }
    }
    for candidate in ["main", "master"] {
        if branch_exists(path, candidate) {
            return candidate.to_string();
        }
    }
    list_branches(path)
        .into_iter()
        .next()
        .unwrap_or_else(|| "main".to_string())
}

pub fn list_branches(path: &Path) -> Vec<String> {
    run_git(path, &["branch", "--format=%(refname:short)"])
        .map(|out| {
            out.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub fn branch_exists(path: &Path, branch: &str) -> bool {
    run_git(
        path,
        &["rev-parse", "--verify", &format!("refs/heads/{branch}")],
    )
    .is_some()
}

/// Changed files vs the merge base with `target`, plus untracked files.
pub fn changed_files(path: &Path, target: &str) -> Vec<ChangedFile> {
    let mut files = Vec::new();

    if let Some(out) = run_git(
        path,
        &["diff", "--name-status", &format!("{target}...")],
    ) {
        for line in out.lines() {
            let mut parts = line.split('\t');
            let Some(code) = parts.next() else { continue };
            let status = match code.chars().next() {
                Some('A') => ChangeStatus::Added,
                Some('M') => ChangeStatus::Modified,
                Some('D') => ChangeStatus::Deleted,
                Some('R') => ChangeStatus::Renamed,
                _ => continue,
            };
            // Renames carry "old\tnew"; the review tracks the new path.
            let file = if status == ChangeStatus::Renamed {
                parts.next_back()
            } else {
                parts.next()
            };
            if let Some(file) = file {
                files.push(ChangedFile {
                    path: file.to_string(),
                    status,
                });
            }
        }
    }

    for file in untracked_files(path) {
        files.push(ChangedFile {
            path: file,
            status: ChangeStatus::Untracked,
        });
    }

    files
}

/// Unified diff between the merge base with `target` and the working tree.
///
/// `untracked` paths (files git does not know yet but the review tracks)
/// are appended as synthetic new-file diffs. Binary content is elided by
/// git itself.
pub fn diff(path: &Path, target: &str, untracked: &[String]) -> String {
    let mut out = run_git(path, &["diff", &format!("{target}...")]).unwrap_or_default();

    for file in untracked {
        if let Some(synthetic) = synthetic_new_file_diff(path, file) {
            out.push_str(&synthetic);
        }
    }
    out
}

/// A "new file" diff for a path git has never seen: every line prefixed `+`
/// under a single `@@ -0,0 +1,N @@` hunk.
pub fn synthetic_new_file_diff(repo: &Path, file: &str) -> Option<String> {
    let full = resolve_in_repo(repo, file)?;
    let content = std::fs::read_to_string(full).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str(&format!("diff --git a/{file} b/{file}\n"));
    out.push_str("new file mode 100644\n");
    out.push_str("--- /dev/null\n");
    out.push_str(&format!("+++ b/{file}\n"));
    out.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
    for line in lines {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    Some(out)
}

/// File content from `git show ref:file` when `at_ref` is given, otherwise
/// from the working tree.
pub fn file_content(repo: &Path, at_ref: Option<&str>, file: &str) -> Option<String> {
    match at_ref {
        Some(r) => run_git(repo, &["show", &format!("{r}:{file}")]),
        None => {
            let full = resolve_in_repo(repo, file)?;
            std::fs::read_to_string(full).ok()
        }
    }
}

/// Working-tree lines `from..=to`, 1-indexed, clamped to the file bounds.
/// `from > to` yields an empty vec; a missing file yields `None`.
pub fn lines_range(repo: &Path, file: &str, from: u32, to: u32) -> Option<Vec<(u32, String)>> {
    let content = file_content(repo, None, file)?;
    let lines: Vec<&str> = content.lines().collect();
    if from > to || lines.is_empty() {
        return Some(Vec::new());
    }

    let start = from.max(1) as usize;
    let end = (to as usize).min(lines.len());
    if start > end {
        return Some(Vec::new());
    }

    Some(
        (start..=end)
            .map(|n| (n as u32, lines[n - 1].to_string()))
            .collect(),
    )
}

pub fn staged_files(path: &Path) -> Vec<String> {
    run_git(path, &["diff", "--cached", "--name-only"])
        .map(lines_vec)
        .unwrap_or_default()
}

pub fn unstaged_files(path: &Path) -> Vec<String> {
    run_git(path, &["diff", "--name-only"])
        .map(lines_vec)
        .unwrap_or_default()
}

pub fn untracked_files(path: &Path) -> Vec<String> {
    run_git(path, &["ls-files", "--others", "--exclude-standard"])
        .map(lines_vec)
        .unwrap_or_default()
}

pub fn stage_file(path: &Path, file: &str) -> bool {
    run_git(path, &["add", "--", file]).is_some()
}

/// Discard working-tree changes to `file`.
pub fn restore_file(path: &Path, file: &str) -> bool {
    run_git(path, &["restore", "--", file]).is_some()
}

/// URL of `remote` (defaults to `origin`).
pub fn remote_url(path: &Path, remote: &str) -> Option<String> {
    run_git(path, &["remote", "get-url", remote])
        .map(|out| out.trim().to_string())
        .filter(|u| !u.is_empty())
}

pub fn push(path: &Path, remote: &str, branch: &str) -> bool {
    run_git(path, &["push", remote, branch]).is_some()
}

/// One line of `git log` output for the history surface.
#[derive(Debug, Clone, Serialize)]
pub struct CommitEntry {
    pub hash: String,
    pub subject: String,
    pub author: String,
    pub date: String,
}

pub fn log_entries(path: &Path, limit: u32) -> Vec<CommitEntry> {
    let pretty = "--format=%H%x1f%s%x1f%an%x1f%aI";
    run_git(path, &["log", &format!("-{limit}"), pretty])
        .map(|out| {
            out.lines()
                .filter_map(|line| {
                    let mut parts = line.split('\x1f');
                    Some(CommitEntry {
                        hash: parts.next()?.to_string(),
                        subject: parts.next()?.to_string(),
                        author: parts.next()?.to_string(),
                        date: parts.next()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve `rel` against `repo`, refusing paths that escape the repo root.
pub fn resolve_in_repo(repo: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute()
        || rel_path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return None;
    }

    let root = std::fs::canonicalize(repo).unwrap_or_else(|_| repo.to_path_buf());
    let joined = root.join(rel_path);
    // Symlinks inside the repo may still point outside it.
    let resolved = std::fs::canonicalize(&joined).unwrap_or(joined);
    if resolved.starts_with(&root) {
        Some(resolved)
    } else {
        None
    }
}

fn lines_vec(out: String) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
