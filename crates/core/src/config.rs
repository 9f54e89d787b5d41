//! Server configuration.
//!
//! Loaded from `revline.toml` next to the data directory (or the path in
//! `REVLINE_CONFIG`). Secrets are never read from the file — they come from
//! environment variables so the config can be committed to dotfiles.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "revline.toml";

/// Env var holding the hosted-API token when a session has no explicit ref.
pub const ENV_DEFAULT_API_TOKEN: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Files larger than this many bytes are not inlined in diff responses.
    pub large_file_threshold: u64,
    /// Diffs touching more lines than this are collapsed client-side.
    pub line_count_threshold: u64,
    /// Lines of surrounding context returned by the context endpoint.
    pub context_expand_size: u64,
    /// Quiet interval for the filesystem watcher.
    pub watcher_debounce_ms: u64,
    /// Push whitelist: repo pattern → allowed branch patterns.
    /// Empty means every push is allowed.
    pub push_whitelist: BTreeMap<String, Vec<String>>,
    /// OAuth access-token lifetime, seconds.
    pub access_token_ttl: i64,
    /// OAuth refresh-token lifetime, seconds.
    pub refresh_token_ttl: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8576,
            large_file_threshold: 50_000,
            line_count_threshold: 400,
            context_expand_size: 15,
            watcher_debounce_ms: 300,
            push_whitelist: BTreeMap::new(),
            access_token_ttl: 3600,
            refresh_token_ttl: 30 * 24 * 3600,
        }
    }
}

impl ServerConfig {
    /// Load from a toml file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self, crate::ServiceError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::ServiceError::Internal(format!("read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| crate::ServiceError::Internal(format!("parse {}: {e}", path.display())))
    }

    /// Apply environment overrides (`REVLINE_PORT`).
    pub fn apply_env(mut self) -> Self {
        if let Some(port) = std::env::var("REVLINE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.port = port;
        }
        self
    }

    /// The subset that is safe to hand to browser clients.
    pub fn client_view(&self) -> ClientConfig {
        ClientConfig {
            large_file_threshold: self.large_file_threshold,
            line_count_threshold: self.line_count_threshold,
            context_expand_size: self.context_expand_size,
        }
    }
}

/// Client-safe configuration subset returned by `GET /api/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub large_file_threshold: u64,
    pub line_count_threshold: u64,
    pub context_expand_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServerConfig::default();
        assert_eq!(c.port, 8576);
        assert_eq!(c.large_file_threshold, 50_000);
        assert_eq!(c.line_count_threshold, 400);
        assert_eq!(c.context_expand_size, 15);
        assert_eq!(c.watcher_debounce_ms, 300);
        assert!(c.push_whitelist.is_empty());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = ServerConfig::load(&dir.path().join("revline.toml")).unwrap();
        assert_eq!(c.port, 8576);
    }

    #[test]
    fn partial_file_keeps_defaults_for_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revline.toml");
        std::fs::write(
            &path,
            "port = 9999\n\n[push_whitelist]\n\"org/*\" = [\"main\"]\n",
        )
        .unwrap();
        let c = ServerConfig::load(&path).unwrap();
        assert_eq!(c.port, 9999);
        assert_eq!(c.watcher_debounce_ms, 300);
        assert_eq!(c.push_whitelist["org/*"], vec!["main"]);
    }

    #[test]
    fn client_view_omits_whitelist() {
        let c = ServerConfig::default().client_view();
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("push_whitelist").is_none());
        assert_eq!(json["context_expand_size"], 15);
    }
}
