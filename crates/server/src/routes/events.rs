//! The live event stream.
//!
//! Each connection registers a client on the bus; subscribing to a local
//! session also spins up (or joins) that session's filesystem watcher. The
//! stream owns its cleanup: when the client disconnects, the bus entry is
//! dropped and the watcher loses one subscriber.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

use revline_core::BackendKind;
use revline_engine::Engine;
use revline_engine::events::ClientId;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session: Option<String>,
}

/// Unregisters the client (and its watcher interest) when the SSE stream
/// is dropped.
struct ClientGuard {
    engine: Engine,
    client_id: ClientId,
    session: Option<String>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.engine.bus.unregister(self.client_id);
        if let Some(session) = &self.session {
            self.engine.watchers.unsubscribe(session);
        }
    }
}

/// An SSE event stream that tears down its bus/watcher registration on drop.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>,
    _guard: ClientGuard,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// GET /events[?session=ID] — `text/event-stream` with named events and a
/// periodic heartbeat comment.
pub async fn events(
    State(engine): State<Engine>,
    Query(q): Query<EventsQuery>,
) -> Sse<KeepAliveStream<EventStream>> {
    let (client_id, rx) = engine.bus.register();

    if let Some(session_id) = &q.session {
        engine.bus.subscribe(client_id, session_id);
        if let Ok(session) = engine.session(session_id) {
            if let BackendKind::Local { repo_path, .. } = &session.backend {
                engine.watchers.subscribe(
                    session_id,
                    repo_path,
                    engine.config.watcher_debounce_ms,
                    engine.db.clone(),
                    engine.bus.clone(),
                );
            }
        }
    }

    let connected = Event::default()
        .event("connected")
        .data(json!({ "client_id": client_id, "session": q.session }).to_string());

    let live = UnboundedReceiverStream::new(rx).map(|ev| {
        Ok(Event::default()
            .event(ev.name.as_str())
            .data(ev.payload.to_string()))
    });
    let stream =
        futures::stream::once(async move { Ok::<_, Infallible>(connected) }).chain(live);

    let guard = ClientGuard {
        engine: engine.clone(),
        client_id,
        session: q.session,
    };

    Sse::new(EventStream {
        inner: Box::pin(stream),
        _guard: guard,
    })
    .keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
