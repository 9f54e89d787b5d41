//! Shared fixtures for tests that need a real repository.

use std::path::Path;
use std::process::Command;

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .status()
        .expect("git binary available");
    assert!(status.success(), "git {args:?} failed in {}", repo.display());
}

/// Initialise a repo on `main` with one committed `README.md` ("hello\nworld\n").
pub fn init_test_repo(path: &Path) {
    git(path, &["init", "-b", "main"]);
    git(path, &["config", "user.email", "test@revline.dev"]);
    git(path, &["config", "user.name", "revline test"]);
    std::fs::write(path.join("README.md"), "hello\nworld\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "initial"]);
}

/// Write `content` to `file` under the repo root, creating parent dirs.
pub fn write_file(repo: &Path, file: &str, content: &str) {
    let full = repo.join(file);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
}

/// Stage everything and commit.
pub fn commit_all(repo: &Path, message: &str) {
    git(repo, &["add", "."]);
    git(repo, &["commit", "-m", message]);
}

/// Create and check out a branch.
pub fn checkout_new_branch(repo: &Path, branch: &str) {
    git(repo, &["checkout", "-b", branch]);
}
