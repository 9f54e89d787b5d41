//! Backend over a hosted GitHub pull request.
//!
//! All API access goes through the single GraphQL endpoint; REST is used
//! only for the raw diff, which GraphQL cannot produce. Paginated queries
//! follow cursors until `pageInfo.hasNextPage` is false.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use revline_core::case::to_snake_case;
use revline_core::time::{now_iso, now_unix};
use revline_core::{ServiceError, SessionType};
use revline_git_cli::ops::{ChangeStatus, ChangedFile};
use revline_store::CommentRow;

use crate::publish::PrState;
use crate::rate_limit::RateLimit;
use crate::{DiffSide, NewComment, ReviewBackend};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("revline/", env!("CARGO_PKG_VERSION"));

/// Shared GitHub API client. Rate-limit state is shared by every clone so
/// concurrent sessions against the same token observe one quota.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    rate: Arc<Mutex<RateLimit>>,
}

/// Minimal PR facts used by the backend and the push coordinator.
#[derive(Debug, Clone)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
    pub state: PrState,
}

impl GithubClient {
    pub fn new(token: String) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE.to_string())
    }

    /// Used by tests to point the client at a stub server.
    pub fn with_api_base(token: String, api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            token,
            rate: Arc::new(Mutex::new(RateLimit::default())),
        }
    }

    pub fn rate_limit(&self) -> RateLimit {
        *self.rate.lock().expect("rate limit mutex poisoned")
    }

    fn check_rate(&self) -> Result<(), ServiceError> {
        self.rate
            .lock()
            .expect("rate limit mutex poisoned")
            .check(now_unix())
    }

    fn update_rate(&self, headers: &reqwest::header::HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };
        self.rate
            .lock()
            .expect("rate limit mutex poisoned")
            .update(parse("x-ratelimit-remaining"), parse("x-ratelimit-reset"));
    }

    /// Execute a GraphQL request. API failures surface with their cause —
    /// they are never absorbed.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ServiceError> {
        self.check_rate()?;

        let resp = self
            .http
            .post(format!("{}/graphql", self.api_base))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("hosted API request failed: {e}")))?;

        self.update_rate(resp.headers());

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("hosted API response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(ServiceError::Upstream(format!(
                "hosted API returned {status}: {}",
                body["message"].as_str().unwrap_or("unknown error")
            )));
        }
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let first = errors[0]["message"].as_str().unwrap_or("unknown error");
                return Err(ServiceError::Upstream(format!("hosted API error: {first}")));
            }
        }
        Ok(body["data"].clone())
    }

    /// Raw unified diff via REST (`application/vnd.github.v3.diff`) — the
    /// one surface GraphQL has no equivalent for.
    pub async fn raw_diff(&self, owner: &str, repo: &str, number: u64) -> Result<String, ServiceError> {
        self.check_rate()?;

        let resp = self
            .http
            .get(format!("{}/repos/{owner}/{repo}/pulls/{number}", self.api_base))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3.diff")
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("hosted API request failed: {e}")))?;

        self.update_rate(resp.headers());

        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Upstream(format!(
                "hosted API returned {status} for PR diff"
            )));
        }
        resp.text()
            .await
            .map_err(|e| ServiceError::Upstream(format!("hosted API response unreadable: {e}")))
    }

    /// Follow `pageInfo` cursors over `query`, collecting the node array at
    /// `path` (dot-separated, relative to `data`). Collected nodes have
    /// their keys normalised to snake_case — camelCase stops here.
    async fn paginate(
        &self,
        query: &str,
        mut variables: Value,
        path: &str,
    ) -> Result<Vec<Value>, ServiceError> {
        let mut nodes = Vec::new();
        loop {
            let data = self.graphql(query, variables.clone()).await?;
            let connection = path
                .split('.')
                .fold(&data, |acc, seg| &acc[seg]);

            if let Some(page) = connection["nodes"].as_array() {
                nodes.extend(page.iter().cloned().map(snake_case_keys));
            }
            let page_info = &connection["pageInfo"];
            if page_info["hasNextPage"].as_bool() != Some(true) {
                break;
            }
            variables["cursor"] = page_info["endCursor"].clone();
        }
        Ok(nodes)
    }

    /// PR node id and head commit, needed by thread mutations.
    async fn pr_node(&self, owner: &str, repo: &str, number: u64) -> Result<(String, String), ServiceError> {
        let data = self
            .graphql(
                "query($owner: String!, $repo: String!, $number: Int!) {
                   repository(owner: $owner, name: $repo) {
                     pullRequest(number: $number) { id headRefOid }
                   }
                 }",
                json!({ "owner": owner, "repo": repo, "number": number }),
            )
            .await?;
        let pr = &data["repository"]["pullRequest"];
        match (pr["id"].as_str(), pr["headRefOid"].as_str()) {
            (Some(id), Some(oid)) => Ok((id.to_string(), oid.to_string())),
            _ => Err(ServiceError::NotFound(format!(
                "pull request {owner}/{repo}#{number} not found"
            ))),
        }
    }

    /// Blob text at `expression` (`ref-or-oid:path`), `None` when absent.
    async fn blob_text(&self, owner: &str, repo: &str, expression: &str) -> Result<Option<String>, ServiceError> {
        let data = self
            .graphql(
                "query($owner: String!, $repo: String!, $expression: String!) {
                   repository(owner: $owner, name: $repo) {
                     object(expression: $expression) { ... on Blob { text } }
                   }
                 }",
                json!({ "owner": owner, "repo": repo, "expression": expression }),
            )
            .await?;
        Ok(data["repository"]["object"]["text"].as_str().map(String::from))
    }

    /// Open PR whose head is `branch`, if any.
    pub async fn find_open_pr(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<PrInfo>, ServiceError> {
        let data = self
            .graphql(
                "query($owner: String!, $repo: String!, $branch: String!) {
                   repository(owner: $owner, name: $repo) {
                     pullRequests(headRefName: $branch, states: [OPEN], first: 1) {
                       nodes { number url state }
                     }
                   }
                 }",
                json!({ "owner": owner, "repo": repo, "branch": branch }),
            )
            .await?;
        let nodes = data["repository"]["pullRequests"]["nodes"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(nodes.first().map(pr_info_from_node))
    }

    pub async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<PrInfo, ServiceError> {
        let data = self
            .graphql(
                "query($owner: String!, $repo: String!) {
                   repository(owner: $owner, name: $repo) { id }
                 }",
                json!({ "owner": owner, "repo": repo }),
            )
            .await?;
        let repo_id = data["repository"]["id"]
            .as_str()
            .ok_or_else(|| ServiceError::NotFound(format!("repository {owner}/{repo} not found")))?
            .to_string();

        let data = self
            .graphql(
                "mutation($repoId: ID!, $base: String!, $head: String!, $title: String!, $body: String!) {
                   createPullRequest(input: {repositoryId: $repoId, baseRefName: $base,
                                             headRefName: $head, title: $title, body: $body}) {
                     pullRequest { number url state }
                   }
                 }",
                json!({ "repoId": repo_id, "base": base, "head": head, "title": title, "body": body }),
            )
            .await?;
        Ok(pr_info_from_node(&data["createPullRequest"]["pullRequest"]))
    }
}

fn pr_info_from_node(node: &Value) -> PrInfo {
    PrInfo {
        number: node["number"].as_u64().unwrap_or(0),
        url: node["url"].as_str().unwrap_or_default().to_string(),
        state: normalize_pr_state(node["state"].as_str().unwrap_or("")),
    }
}

/// Lowercases the API state; missing or unknown collapses to open.
pub fn normalize_pr_state(raw: &str) -> PrState {
    match raw.to_ascii_lowercase().as_str() {
        "closed" => PrState::Closed,
        "merged" => PrState::Merged,
        _ => PrState::Open,
    }
}

fn map_change_type(raw: &str) -> ChangeStatus {
    match raw {
        "ADDED" => ChangeStatus::Added,
        "DELETED" => ChangeStatus::Deleted,
        "RENAMED" => ChangeStatus::Renamed,
        _ => ChangeStatus::Modified,
    }
}

/// Rename JSON object keys to snake_case, recursively. Values are left
/// untouched.
fn snake_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_snake_case(&k), snake_case_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_case_keys).collect()),
        other => other,
    }
}

/// `RIGHT`/`LEFT` from the API → the canonical `new`/`old` vocabulary.
fn map_diff_side(raw: &str) -> String {
    match raw {
        "LEFT" => "old".to_string(),
        _ => "new".to_string(),
    }
}

/// Flatten review-thread nodes (snake_case keys, as produced by
/// [`GithubClient::paginate`]) into normalised comment rows. The thread id
/// becomes the root comment's id so replies and resolve operations can
/// target it directly.
fn normalize_threads(session_id: &str, threads: &[Value]) -> Vec<CommentRow> {
    let mut rows = Vec::new();
    for thread in threads {
        let thread_id = thread["id"].as_str().unwrap_or_default().to_string();
        let file = thread["path"].as_str().unwrap_or_default().to_string();
        let line = thread["line"].as_i64().unwrap_or(0);
        let resolved = thread["is_resolved"].as_bool().unwrap_or(false);

        let comments = thread["comments"]["nodes"].as_array().cloned().unwrap_or_default();
        for (i, c) in comments.iter().enumerate() {
            let created = c["created_at"].as_str().unwrap_or_default().to_string();
            let updated = c["updated_at"].as_str().unwrap_or(&created).to_string();
            rows.push(CommentRow {
                id: if i == 0 {
                    thread_id.clone()
                } else {
                    c["id"].as_str().unwrap_or_default().to_string()
                },
                session_id: session_id.to_string(),
                parent_id: (i > 0).then(|| thread_id.clone()),
                file: file.clone(),
                line,
                side: thread["diff_side"].as_str().map(map_diff_side),
                body: c["body"].as_str().unwrap_or_default().to_string(),
                author: c["author"]["login"].as_str().unwrap_or("unknown").to_string(),
                line_content: None,
                context_before: None,
                context_after: None,
                line_content_hash: String::new(),
                resolved,
                created_at: created,
                updated_at: updated,
            });
        }
    }
    rows
}

/// One hosted pull request as a review backend.
pub struct HostedPrBackend {
    client: GithubClient,
    owner: String,
    repo: String,
    number: u64,
}

impl HostedPrBackend {
    pub fn new(client: GithubClient, owner: String, repo: String, number: u64) -> Self {
        Self {
            client,
            owner,
            repo,
            number,
        }
    }
}

#[async_trait]
impl ReviewBackend for HostedPrBackend {
    fn session_id(&self) -> String {
        format!("hosted:{}/{}:{}", self.owner, self.repo, self.number)
    }

    fn session_type(&self) -> SessionType {
        SessionType::Hosted
    }

    fn descriptor(&self) -> serde_json::Value {
        json!({
            "type": "hosted",
            "owner": self.owner,
            "repo": self.repo,
            "pr_number": self.number,
        })
    }

    async fn list_files(&self) -> Result<Vec<ChangedFile>, ServiceError> {
        let nodes = self
            .client
            .paginate(
                "query($owner: String!, $repo: String!, $number: Int!, $cursor: String) {
                   repository(owner: $owner, name: $repo) {
                     pullRequest(number: $number) {
                       files(first: 100, after: $cursor) {
                         pageInfo { hasNextPage endCursor }
                         nodes { path changeType }
                       }
                     }
                   }
                 }",
                json!({ "owner": self.owner, "repo": self.repo, "number": self.number }),
                "repository.pullRequest.files",
            )
            .await?;

        Ok(nodes
            .iter()
            .filter_map(|n| {
                Some(ChangedFile {
                    path: n["path"].as_str()?.to_string(),
                    status: map_change_type(n["change_type"].as_str().unwrap_or("")),
                })
            })
            .collect())
    }

    async fn get_diff(&self) -> Result<String, ServiceError> {
        self.client.raw_diff(&self.owner, &self.repo, self.number).await
    }

    async fn file_content(
        &self,
        file: &str,
        side: DiffSide,
        range: Option<(u32, u32)>,
    ) -> Result<Option<String>, ServiceError> {
        let data = self
            .client
            .graphql(
                "query($owner: String!, $repo: String!, $number: Int!) {
                   repository(owner: $owner, name: $repo) {
                     pullRequest(number: $number) { baseRefOid headRefOid }
                   }
                 }",
                json!({ "owner": self.owner, "repo": self.repo, "number": self.number }),
            )
            .await?;
        let pr = &data["repository"]["pullRequest"];
        let oid = match side {
            DiffSide::Base => pr["baseRefOid"].as_str(),
            DiffSide::Head => pr["headRefOid"].as_str(),
        }
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "pull request {}/{}#{} not found",
                self.owner, self.repo, self.number
            ))
        })?;

        let content = self
            .client
            .blob_text(&self.owner, &self.repo, &format!("{oid}:{file}"))
            .await?;
        Ok(match (content, range) {
            (Some(content), Some((from, to))) => crate::extract_lines(&content, from, to),
            (content, None) => content,
            (None, _) => None,
        })
    }

    async fn list_comments(&self) -> Result<Vec<CommentRow>, ServiceError> {
        let threads = self
            .client
            .paginate(
                "query($owner: String!, $repo: String!, $number: Int!, $cursor: String) {
                   repository(owner: $owner, name: $repo) {
                     pullRequest(number: $number) {
                       reviewThreads(first: 50, after: $cursor) {
                         pageInfo { hasNextPage endCursor }
                         nodes {
                           id path line diffSide isResolved
                           comments(first: 100) {
                             nodes { id body createdAt updatedAt author { login } }
                           }
                         }
                       }
                     }
                   }
                 }",
                json!({ "owner": self.owner, "repo": self.repo, "number": self.number }),
                "repository.pullRequest.reviewThreads",
            )
            .await?;

        Ok(normalize_threads(&self.session_id(), &threads))
    }

    async fn add_comment(&self, new: NewComment) -> Result<CommentRow, ServiceError> {
        let now = now_iso();
        let (id, body_text) = match &new.parent_id {
            // Replies target the thread id.
            Some(thread_id) => {
                let data = self
                    .client
                    .graphql(
                        "mutation($threadId: ID!, $body: String!) {
                           addPullRequestReviewThreadReply(input: {
                             pullRequestReviewThreadId: $threadId, body: $body
                           }) { comment { id } }
                         }",
                        json!({ "threadId": thread_id, "body": new.body }),
                    )
                    .await?;
                (
                    data["addPullRequestReviewThreadReply"]["comment"]["id"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    new.body.clone(),
                )
            }
            None => {
                let (pr_id, _head_oid) =
                    self.client.pr_node(&self.owner, &self.repo, self.number).await?;
                let side = match new.side.as_deref() {
                    Some("old") => "LEFT",
                    _ => "RIGHT",
                };
                let data = self
                    .client
                    .graphql(
                        "mutation($prId: ID!, $path: String!, $line: Int!, $side: DiffSide!, $body: String!) {
                           addPullRequestReviewThread(input: {
                             pullRequestId: $prId, path: $path, line: $line, side: $side, body: $body
                           }) { thread { id } }
                         }",
                        json!({
                            "prId": pr_id,
                            "path": new.file,
                            "line": new.line,
                            "side": side,
                            "body": new.body,
                        }),
                    )
                    .await?;
                (
                    data["addPullRequestReviewThread"]["thread"]["id"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    new.body.clone(),
                )
            }
        };

        Ok(CommentRow {
            id,
            session_id: self.session_id(),
            parent_id: new.parent_id,
            file: new.file,
            line: new.line,
            side: new.side,
            body: body_text,
            author: new.author,
            line_content: new.line_content.clone(),
            context_before: new.context_before,
            context_after: new.context_after,
            line_content_hash: revline_core::hash::line_content_hash(new.line_content.as_deref()),
            resolved: false,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn resolve_comment(&self, id: &str) -> Result<(), ServiceError> {
        self.client
            .graphql(
                "mutation($threadId: ID!) {
                   resolveReviewThread(input: {threadId: $threadId}) { thread { id } }
                 }",
                json!({ "threadId": id }),
            )
            .await?;
        Ok(())
    }

    async fn unresolve_comment(&self, id: &str) -> Result<(), ServiceError> {
        self.client
            .graphql(
                "mutation($threadId: ID!) {
                   unresolveReviewThread(input: {threadId: $threadId}) { thread { id } }
                 }",
                json!({ "threadId": id }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_encodes_owner_repo_number() {
        let b = HostedPrBackend::new(GithubClient::new("t".into()), "org".into(), "repo".into(), 7);
        assert_eq!(b.session_id(), "hosted:org/repo:7");
        assert_eq!(b.session_type(), SessionType::Hosted);
        assert_eq!(b.descriptor()["pr_number"], 7);
    }

    #[test]
    fn pr_state_normalisation_defaults_to_open() {
        assert_eq!(normalize_pr_state("OPEN"), PrState::Open);
        assert_eq!(normalize_pr_state("closed"), PrState::Closed);
        assert_eq!(normalize_pr_state("MERGED"), PrState::Merged);
        assert_eq!(normalize_pr_state(""), PrState::Open);
        assert_eq!(normalize_pr_state("garbage"), PrState::Open);
    }

    #[test]
    fn change_type_mapping() {
        assert_eq!(map_change_type("ADDED"), ChangeStatus::Added);
        assert_eq!(map_change_type("DELETED"), ChangeStatus::Deleted);
        assert_eq!(map_change_type("RENAMED"), ChangeStatus::Renamed);
        assert_eq!(map_change_type("MODIFIED"), ChangeStatus::Modified);
        assert_eq!(map_change_type("COPIED"), ChangeStatus::Modified);
    }

    #[test]
    fn snake_case_keys_normalises_nested_objects() {
        let node = snake_case_keys(json!({
            "isResolved": true,
            "comments": { "nodes": [{ "createdAt": "t", "author": { "login": "a" } }] },
        }));
        assert_eq!(node["is_resolved"], true);
        assert_eq!(node["comments"]["nodes"][0]["created_at"], "t");
        assert_eq!(node["comments"]["nodes"][0]["author"]["login"], "a");
    }

    #[test]
    fn threads_flatten_with_thread_id_as_root() {
        // camelCase as it arrives from the API; paginate snake-cases it
        let threads: Vec<Value> = vec![json!({
            "id": "T_1",
            "path": "src/lib.rs",
            "line": 12,
            "diffSide": "RIGHT",
            "isResolved": true,
            "comments": { "nodes": [
                { "id": "C_1", "body": "root", "createdAt": "2026-01-01T00:00:00Z",
                  "updatedAt": "2026-01-01T00:00:00Z", "author": { "login": "alice" } },
                { "id": "C_2", "body": "reply", "createdAt": "2026-01-01T01:00:00Z",
                  "updatedAt": "2026-01-01T01:00:00Z", "author": { "login": "bob" } }
            ]}
        })]
        .into_iter()
        .map(snake_case_keys)
        .collect();

        let rows = normalize_threads("hosted:org/repo:7", &threads);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "T_1");
        assert_eq!(rows[0].parent_id, None);
        assert!(rows[0].resolved);
        assert_eq!(rows[0].side.as_deref(), Some("new"));
        assert_eq!(rows[1].id, "C_2");
        assert_eq!(rows[1].parent_id.as_deref(), Some("T_1"));
        assert_eq!(rows[1].author, "bob");
        assert_eq!(rows[1].file, "src/lib.rs");
        assert_eq!(rows[1].line, 12);
    }

    #[test]
    fn diff_side_maps_to_canonical_vocabulary() {
        assert_eq!(map_diff_side("RIGHT"), "new");
        assert_eq!(map_diff_side("LEFT"), "old");
        assert_eq!(map_diff_side("unexpected"), "new");
    }
}
