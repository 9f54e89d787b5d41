//! Per-session filesystem watching.
//!
//! A recursive notify watcher feeds raw events into a channel; a tokio loop
//! debounces them into batches. One `files-changed` fires per quiet
//! interval, followed by `diff-changed` when the batch intersects the
//! session's tracked files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use revline_store::Db;

use crate::events::{EventBus, EventName};
use crate::session::effective_files;

const IGNORED_SEGMENTS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    ".idea",
    ".vscode",
    "__pycache__",
];

const IGNORED_SUFFIXES: &[&str] = &[".db", ".db-wal", ".db-shm", ".log", ".tmp", ".swp"];

/// Should this path be invisible to the review?
pub fn is_ignored(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if name.starts_with('.') {
            return true;
        }
    }
    for segment in path.iter().filter_map(|s| s.to_str()) {
        if IGNORED_SEGMENTS.contains(&segment) {
            return true;
        }
    }
    let raw = path.to_string_lossy();
    IGNORED_SUFFIXES.iter().any(|suffix| raw.ends_with(suffix))
}

/// A live watch over one session's repository. Dropping the handle stops
/// both the notify watcher and the debounce task.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `repo_path` for `session_id`.
pub fn spawn_watcher(
    session_id: String,
    repo_path: PathBuf,
    debounce_ms: u64,
    db: Db,
    bus: EventBus,
) -> Result<WatcherHandle, notify::Error> {
    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    let root = repo_path.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        match res {
            Ok(event) => {
                for path in event.paths {
                    let rel = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
                    if is_ignored(&rel) {
                        continue;
                    }
                    let _ = tx.send(rel);
                }
            }
            Err(e) => error!("watcher error: {e}"),
        }
    })?;
    watcher.watch(&repo_path, RecursiveMode::Recursive)?;
    info!("watching {} for session {session_id}", repo_path.display());

    let task = tokio::spawn(debounce_loop(session_id, debounce_ms, rx, db, bus));

    Ok(WatcherHandle {
        _watcher: watcher,
        task,
    })
}

/// Accumulate paths until the quiet interval elapses with no new event,
/// then flush one batch.
async fn debounce_loop(
    session_id: String,
    debounce_ms: u64,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    db: Db,
    bus: EventBus,
) {
    let quiet = Duration::from_millis(debounce_ms.max(1));
    let mut pending: HashSet<PathBuf> = HashSet::new();
    let mut last_event = tokio::time::Instant::now();
    let mut tick = tokio::time::interval(Duration::from_millis((debounce_ms / 3).max(25)));

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(path) => {
                        pending.insert(path);
                        last_event = tokio::time::Instant::now();
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                if pending.is_empty() || last_event.elapsed() < quiet {
                    continue;
                }
                let batch: Vec<String> = std::mem::take(&mut pending)
                    .into_iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect();
                flush_batch(&session_id, batch, &db, &bus);
            }
        }
    }
    debug!("watcher loop for session {session_id} stopped");
}

fn flush_batch(session_id: &str, mut batch: Vec<String>, db: &Db, bus: &EventBus) {
    batch.sort();
    debug!("session {session_id}: {} files changed", batch.len());

    bus.emit(
        session_id,
        EventName::FilesChanged,
        json!({ "session_id": session_id, "files": batch }),
    );

    let tracked: HashSet<String> = match db.get_session(session_id) {
        Ok(Some(session)) => effective_files(&session).into_iter().collect(),
        Ok(None) => return,
        Err(e) => {
            warn!("watcher could not load session {session_id}: {e}");
            return;
        }
    };

    if batch.iter().any(|f| tracked.contains(f)) {
        bus.emit(
            session_id,
            EventName::DiffChanged,
            json!({ "session_id": session_id }),
        );
    }
    if let Err(e) = db.touch_session(session_id) {
        warn!("watcher could not touch session {session_id}: {e}");
    }
}

/// Watch registry: one watcher per session, reference-counted by SSE
/// subscribers. The watch starts with the first subscriber and stops with
/// the last one (or on session delete).
#[derive(Clone, Default)]
pub struct WatcherTable {
    inner: Arc<Mutex<HashMap<String, WatchEntry>>>,
}

struct WatchEntry {
    handle: WatcherHandle,
    subscribers: usize,
}

impl WatcherTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a new subscriber, creating the watch if needed.
    pub fn subscribe(
        &self,
        session_id: &str,
        repo_path: &Path,
        debounce_ms: u64,
        db: Db,
        bus: EventBus,
    ) {
        let mut inner = self.inner.lock().expect("watcher table mutex poisoned");
        if let Some(entry) = inner.get_mut(session_id) {
            entry.subscribers += 1;
            return;
        }
        match spawn_watcher(session_id.to_string(), repo_path.to_path_buf(), debounce_ms, db, bus) {
            Ok(handle) => {
                inner.insert(
                    session_id.to_string(),
                    WatchEntry {
                        handle,
                        subscribers: 1,
                    },
                );
            }
            Err(e) => warn!("could not watch {} for {session_id}: {e}", repo_path.display()),
        }
    }

    /// Drop one subscriber; the watch stops when the last one leaves.
    pub fn unsubscribe(&self, session_id: &str) {
        let mut inner = self.inner.lock().expect("watcher table mutex poisoned");
        if let Some(entry) = inner.get_mut(session_id) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                inner.remove(session_id);
            }
        }
    }

    /// Stop the watch immediately (session deleted).
    pub fn remove(&self, session_id: &str) {
        self.inner
            .lock()
            .expect("watcher table mutex poisoned")
            .remove(session_id);
    }

    pub fn is_watching(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .expect("watcher table mutex poisoned")
            .contains_key(session_id)
    }
}
