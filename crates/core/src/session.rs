//! Session identity and backend descriptors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which kind of backend a session draws its diff and comments from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Local,
    Hosted,
}

/// Tagged backend descriptor, stored as a JSON column on the session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendKind {
    Local {
        repo_path: PathBuf,
        target_branch: String,
    },
    Hosted {
        owner: String,
        repo: String,
        pr_number: u64,
        /// Name of the env var holding the API token; `None` uses the default.
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_token_ref: Option<String>,
    },
}

impl BackendKind {
    pub fn session_type(&self) -> SessionType {
        match self {
            Self::Local { .. } => SessionType::Local,
            Self::Hosted { .. } => SessionType::Hosted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_json_is_tagged() {
        let local = BackendKind::Local {
            repo_path: PathBuf::from("/tmp/r"),
            target_branch: "main".into(),
        };
        let json = serde_json::to_value(&local).unwrap();
        assert_eq!(json["type"], "local");

        let hosted = BackendKind::Hosted {
            owner: "org".into(),
            repo: "repo".into(),
            pr_number: 42,
            auth_token_ref: None,
        };
        let json = serde_json::to_value(&hosted).unwrap();
        assert_eq!(json["type"], "hosted");
        assert!(json.get("auth_token_ref").is_none());

        let back: BackendKind = serde_json::from_value(json).unwrap();
        assert_eq!(back.session_type(), SessionType::Hosted);
    }
}
