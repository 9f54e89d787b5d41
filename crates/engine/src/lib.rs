//! The review engine: session management, comment threading, filesystem
//! watching, and event fan-out, aggregated behind one [`Engine`] value that
//! HTTP handlers capture.

pub mod events;
pub mod session;
pub mod staleness;
pub mod threads;
pub mod watcher;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use revline_backend::GithubClient;
use revline_core::ServerConfig;
use revline_store::Db;

pub use events::{EventBus, EventName, OutboundEvent};
pub use session::{ReviewState, SessionView};
pub use staleness::Staleness;
pub use threads::{CommentThread, CommentView};
pub use watcher::WatcherTable;

/// Everything a request handler needs, explicitly owned.
#[derive(Clone)]
pub struct Engine {
    pub db: Db,
    pub config: ServerConfig,
    pub bus: EventBus,
    pub watchers: WatcherTable,
    /// Hosted API clients keyed by token, so sessions sharing a token share
    /// one rate-limit record.
    clients: Arc<Mutex<HashMap<String, GithubClient>>>,
}

impl Engine {
    pub fn new(db: Db, config: ServerConfig) -> Self {
        Self {
            db,
            config,
            bus: EventBus::new(),
            watchers: WatcherTable::new(),
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Shared hosted-API client for `token`.
    pub fn github_client(&self, token: &str) -> GithubClient {
        self.clients
            .lock()
            .expect("client table mutex poisoned")
            .entry(token.to_string())
            .or_insert_with(|| GithubClient::new(token.to_string()))
            .clone()
    }
}
