//! Push coordinator: gate, push, then find or create the hosted PR.

use std::path::Path;

use serde::{Deserialize, Serialize};

use revline_core::ServiceError;
use revline_git_cli::ops;

use crate::hosted::GithubClient;
use crate::push_gate::{PushWhitelist, validate_push};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// Result of a submit: where the branch went and which PR now fronts it.
#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    pub repo: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub state: PrState,
}

/// Push the current branch through the permission gate, then ensure an open
/// PR exists when a hosted client is available.
///
/// `client` is `None` for purely local sessions — the push still runs, the
/// PR bookkeeping is skipped.
pub async fn submit_review(
    repo_path: &Path,
    remote: &str,
    whitelist: &PushWhitelist,
    client: Option<&GithubClient>,
    target_branch: &str,
    title: &str,
    body: &str,
) -> Result<PushOutcome, ServiceError> {
    let branch = ops::current_branch(repo_path);
    if branch == ops::WORKING_BRANCH {
        return Err(ServiceError::BadRequest(format!(
            "{} is not a git repository",
            repo_path.display()
        )));
    }

    let remote_url = ops::remote_url(repo_path, remote).ok_or_else(|| {
        ServiceError::BadRequest(format!("no remote {remote} configured"))
    })?;

    let target = validate_push(whitelist, &remote_url, &branch)?;

    if !ops::push(repo_path, remote, &branch) {
        return Err(ServiceError::Upstream(format!(
            "git push {remote} {branch} failed"
        )));
    }
    tracing::info!("pushed {branch} to {}", target.repo);

    let mut outcome = PushOutcome {
        repo: target.repo.clone(),
        branch: branch.clone(),
        pr_number: None,
        url: None,
        state: PrState::Open,
    };

    if let Some(client) = client {
        let (owner, repo_name) = target
            .repo
            .split_once('/')
            .ok_or_else(|| ServiceError::Internal(format!("malformed repo slug {}", target.repo)))?;

        let pr = match client.find_open_pr(owner, repo_name, &branch).await? {
            Some(existing) => existing,
            None => {
                client
                    .create_pr(owner, repo_name, target_branch, &branch, title, body)
                    .await?
            }
        };
        outcome.pr_number = Some(pr.number);
        outcome.url = Some(pr.url);
        outcome.state = pr.state;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_git_cli::test_utils::init_test_repo;

    #[tokio::test]
    async fn non_repo_is_rejected_before_the_gate() {
        let tmp = tempfile::tempdir().unwrap();
        let err = submit_review(
            tmp.path(),
            "origin",
            &PushWhitelist::new(),
            None,
            "main",
            "t",
            "b",
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn missing_remote_is_a_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let err = submit_review(
            tmp.path(),
            "origin",
            &PushWhitelist::new(),
            None,
            "main",
            "t",
            "b",
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("origin"));
    }

    #[tokio::test]
    async fn gate_denial_stops_before_push() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        std::process::Command::new("git")
            .args(["-C", tmp.path().to_str().unwrap(), "remote", "add", "origin",
                   "git@github.com:org/repo.git"])
            .status()
            .unwrap();

        let mut wl = PushWhitelist::new();
        wl.insert("other/*".into(), vec!["main".into()]);
        let err = submit_review(tmp.path(), "origin", &wl, None, "main", "t", "b")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
