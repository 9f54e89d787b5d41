//! Pull request reference parsing.
//!
//! Three canonical forms are accepted; anything else is `None` and the
//! caller rejects the input:
//!
//! - `https://github.com/owner/repo/pull/123`
//! - `owner/repo#123`
//! - `owner/repo/pull/123`

/// Parsed `(owner, repo, number)`.
pub fn parse_pr_ref(input: &str) -> Option<(String, String, u64)> {
    let input = input.trim();

    if let Some(rest) = input
        .strip_prefix("https://github.com/")
        .or_else(|| input.strip_prefix("http://github.com/"))
    {
        return parse_path_form(rest);
    }

    if let Some((repo_part, number)) = input.split_once('#') {
        let (owner, repo) = split_owner_repo(repo_part)?;
        return Some((owner, repo, number.parse().ok()?));
    }

    parse_path_form(input)
}

/// `owner/repo/pull/123[/…]`
fn parse_path_form(path: &str) -> Option<(String, String, u64)> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?;
    if parts.next()? != "pull" {
        return None;
    }
    let number: u64 = parts.next()?.parse().ok()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string(), number))
}

fn split_owner_repo(s: &str) -> Option<(String, String)> {
    let (owner, repo) = s.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_three_canonical_forms() {
        let expected = Some(("org".to_string(), "repo".to_string(), 42));
        assert_eq!(parse_pr_ref("https://github.com/org/repo/pull/42"), expected);
        assert_eq!(parse_pr_ref("org/repo#42"), expected);
        assert_eq!(parse_pr_ref("org/repo/pull/42"), expected);
        // trailing segments on the URL form are tolerated
        assert_eq!(parse_pr_ref("https://github.com/org/repo/pull/42/files"), expected);
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(parse_pr_ref(""), None);
        assert_eq!(parse_pr_ref("org/repo"), None);
        assert_eq!(parse_pr_ref("org/repo#notanumber"), None);
        assert_eq!(parse_pr_ref("https://github.com/org/repo/issues/42"), None);
        assert_eq!(parse_pr_ref("org#42"), None);
    }
}
