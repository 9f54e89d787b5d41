use axum::{Json, extract::State};

use revline_core::ClientConfig;
use revline_engine::Engine;

/// GET /api/config — the client-safe configuration subset.
pub async fn get_config(State(engine): State<Engine>) -> Json<ClientConfig> {
    Json(engine.config.client_view())
}
