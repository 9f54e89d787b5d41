pub mod comments;
pub mod config;
pub mod events;
pub mod oauth;
pub mod sessions;

use std::path::Path;

use axum::http::HeaderMap;

use revline_core::BackendKind;
use revline_engine::Engine;
use revline_store::SessionRow;

use crate::error::ApiErr;

/// Bearer check for remote-writing endpoints. The OAuth provider is the
/// authentication boundary: when a token is presented it must be live and
/// carry the `write` scope. Requests without a token are the operator on
/// the loopback and pass through.
pub fn require_write_scope(engine: &Engine, headers: &HeaderMap) -> Result<(), ApiErr> {
    let Some(raw) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(());
    };
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .ok_or_else(|| ApiErr::unauthorized("malformed Authorization header"))?;

    if let Some(access) = engine
        .db
        .get_access_token(token)
        .map_err(ApiErr::from_db("load access token"))?
    {
        if access.scope.split_whitespace().any(|s| s == "write") {
            return Ok(());
        }
        return Err(ApiErr(revline_core::ServiceError::Forbidden(
            "write scope required".into(),
        )));
    }

    // API keys are full-access credentials.
    if engine
        .db
        .get_user_by_api_key(token)
        .map_err(ApiErr::from_db("load user by api key"))?
        .is_some()
    {
        return Ok(());
    }

    Err(ApiErr::unauthorized("invalid bearer token"))
}

/// Universal path guard: every handler that accepts a file path resolves it
/// against the session's repository and rejects anything that escapes.
pub fn guard_path(session: &SessionRow, raw: &str) -> Result<String, ApiErr> {
    // Clients URL-encode the path segment; axum decodes once, but a
    // double-encoded traversal should not slip through either.
    let decoded = urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    let escapes = match &session.backend {
        BackendKind::Local { repo_path, .. } => {
            revline_git_cli::ops::resolve_in_repo(repo_path, &decoded).is_none()
        }
        BackendKind::Hosted { .. } => {
            Path::new(&decoded)
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
                || Path::new(&decoded).is_absolute()
        }
    };

    if escapes {
        return Err(ApiErr::bad_request(format!(
            "path traversal rejected: {decoded}"
        )));
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_core::BackendKind;

    fn hosted_session() -> SessionRow {
        SessionRow::new(
            "s".into(),
            BackendKind::Hosted {
                owner: "o".into(),
                repo: "r".into(),
                pr_number: 1,
                auth_token_ref: None,
            },
            "o/r".into(),
            "pr/1".into(),
            "main".into(),
        )
    }

    #[test]
    fn guard_rejects_traversal_even_double_encoded() {
        let s = hosted_session();
        assert!(guard_path(&s, "src/lib.rs").is_ok());
        assert!(guard_path(&s, "../../etc/passwd").is_err());
        assert!(guard_path(&s, "..%2F..%2Fetc%2Fpasswd").is_err());
        assert!(guard_path(&s, "/etc/passwd").is_err());
    }
}
