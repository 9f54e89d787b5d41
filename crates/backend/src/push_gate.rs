//! Push-permission whitelist.
//!
//! The gate runs before any write to a remote. Patterns support `*` as
//! "any run of characters"; every other character is literal. An empty
//! whitelist allows everything — locking down is operator opt-in.

use std::collections::BTreeMap;

use revline_core::ServiceError;

/// Whitelist shape from the config file: repo pattern → branch patterns.
pub type PushWhitelist = BTreeMap<String, Vec<String>>;

/// A normalised push destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub repo: String,
    pub branch: String,
}

/// `https://github.com/o/r[.git][/]`, `git@github.com:o/r[.git]`, or an
/// already-normalised `o/r` → `o/r`. Anything else is `None`.
pub fn normalize_remote(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');

    let path = if let Some(rest) = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
    {
        rest
    } else if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else {
        url
    };

    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    let (owner, repo) = (parts.next()?, parts.next()?);
    if owner.is_empty() || repo.is_empty() || parts.next().is_some() {
        return None;
    }
    if owner.contains([':', '@', ' ']) || repo.contains([':', '@', ' ']) {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

/// Glob-lite matching: `*` matches any run of characters, everything else
/// (including regex metacharacters) is literal.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Whitelist decision for `(repo, branch)`.
pub fn check_push(whitelist: &PushWhitelist, repo: &str, branch: &str) -> Result<(), String> {
    if whitelist.is_empty() {
        return Ok(());
    }

    let matching: Vec<&Vec<String>> = whitelist
        .iter()
        .filter(|(pattern, _)| pattern_matches(pattern, repo))
        .map(|(_, branches)| branches)
        .collect();

    if matching.is_empty() {
        return Err(format!("repository {repo} is not in the push whitelist"));
    }

    let allowed: Vec<&str> = matching
        .iter()
        .flat_map(|branches| branches.iter().map(String::as_str))
        .collect();

    if allowed.iter().any(|p| pattern_matches(p, branch)) {
        Ok(())
    } else {
        Err(format!(
            "branch {branch} is not allowed for {repo}; allowed patterns: {}",
            allowed.join(", ")
        ))
    }
}

/// Full gate: normalise the remote, then check the whitelist.
pub fn validate_push(
    whitelist: &PushWhitelist,
    remote_url: &str,
    branch: &str,
) -> Result<PushTarget, ServiceError> {
    let repo = normalize_remote(remote_url)
        .ok_or_else(|| ServiceError::BadRequest(format!("invalid remote URL: {remote_url}")))?;

    check_push(whitelist, &repo, branch).map_err(ServiceError::Forbidden)?;

    Ok(PushTarget {
        repo,
        branch: branch.to_string(),
    })
}
