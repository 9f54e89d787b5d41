//! Typed event fan-out.
//!
//! Each connected client owns an unbounded channel; `emit` walks the
//! subscriber set for a session and drops clients whose channel is gone. A
//! slow or dead client never stalls the others.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    Connected,
    CommentAdded,
    CommentResolved,
    CommentUnresolved,
    CommentDeleted,
    SessionUpdated,
    FilesChanged,
    DiffChanged,
}

impl EventName {
    /// SSE event name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::CommentAdded => "comment-added",
            Self::CommentResolved => "comment-resolved",
            Self::CommentUnresolved => "comment-unresolved",
            Self::CommentDeleted => "comment-deleted",
            Self::SessionUpdated => "session-updated",
            Self::FilesChanged => "files-changed",
            Self::DiffChanged => "diff-changed",
        }
    }
}

/// One event as delivered to a client sink.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    pub name: EventName,
    pub payload: Value,
}

pub type ClientId = u64;

struct Client {
    tx: mpsc::UnboundedSender<OutboundEvent>,
    subscriptions: HashSet<String>,
}

/// Connection registry with per-session subscriptions.
#[derive(Clone, Default)]
pub struct EventBus {
    clients: Arc<Mutex<HashMap<ClientId, Client>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client and hand back its event stream.
    pub fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().expect("bus mutex poisoned").insert(
            id,
            Client {
                tx,
                subscriptions: HashSet::new(),
            },
        );
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().expect("bus mutex poisoned").remove(&id);
    }

    pub fn subscribe(&self, id: ClientId, session_id: &str) {
        if let Some(client) = self.clients.lock().expect("bus mutex poisoned").get_mut(&id) {
            client.subscriptions.insert(session_id.to_string());
        }
    }

    pub fn unsubscribe(&self, id: ClientId, session_id: &str) {
        if let Some(client) = self.clients.lock().expect("bus mutex poisoned").get_mut(&id) {
            client.subscriptions.remove(session_id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("bus mutex poisoned").len()
    }

    /// Deliver to every subscriber of `session_id`, unregistering clients
    /// whose sink is gone.
    pub fn emit(&self, session_id: &str, name: EventName, payload: Value) {
        self.send_where(name, payload, |c| c.subscriptions.contains(session_id));
    }

    /// Synonym for [`EventBus::emit`]: the audience is the subscriber set.
    pub fn broadcast(&self, session_id: &str, name: EventName, payload: Value) {
        self.emit(session_id, name, payload);
    }

    /// Deliver to every connected client irrespective of subscription.
    pub fn broadcast_all(&self, name: EventName, payload: Value) {
        self.send_where(name, payload, |_| true);
    }

    fn send_where(&self, name: EventName, payload: Value, keep: impl Fn(&Client) -> bool) {
        let mut clients = self.clients.lock().expect("bus mutex poisoned");
        let mut dead = Vec::new();
        for (id, client) in clients.iter() {
            if !keep(client) {
                continue;
            }
            let event = OutboundEvent {
                name,
                payload: payload.clone(),
            };
            if client.tx.send(event).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            debug!("dropping disconnected event client {id}");
            clients.remove(&id);
        }
    }
}
