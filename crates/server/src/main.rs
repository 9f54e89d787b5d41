mod error;
mod routes;
mod rpc;

use std::path::PathBuf;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use revline_core::ServerConfig;
use revline_core::config::CONFIG_FILE_NAME;
use revline_engine::Engine;

fn build_router(engine: Engine) -> Router {
    let api = Router::new()
        .route("/config", get(routes::config::get_config))
        // Sessions
        .route("/sessions", get(routes::sessions::list_sessions))
        .route("/sessions", post(routes::sessions::create_session))
        .route("/sessions/{id}", get(routes::sessions::get_session))
        .route("/sessions/{id}", patch(routes::sessions::patch_session))
        .route("/sessions/{id}", delete(routes::sessions::delete_session))
        .route("/sessions/{id}/diff", get(routes::sessions::get_diff))
        .route(
            "/sessions/{id}/file-content/{*path}",
            get(routes::sessions::get_file_diff),
        )
        .route(
            "/sessions/{id}/context/{*path}",
            get(routes::sessions::get_context),
        )
        .route("/sessions/{id}/branches", get(routes::sessions::get_branches))
        .route("/sessions/{id}/staged", get(routes::sessions::get_staged))
        .route("/sessions/{id}/untracked", get(routes::sessions::get_untracked))
        .route("/sessions/{id}/stage", post(routes::sessions::stage_file))
        .route(
            "/sessions/{id}/manual-files",
            post(routes::sessions::add_manual_file),
        )
        .route(
            "/sessions/{id}/manual-files",
            delete(routes::sessions::remove_manual_file),
        )
        .route(
            "/sessions/{id}/restore-file",
            post(routes::sessions::restore_file),
        )
        .route("/sessions/{id}/submit", post(routes::sessions::submit_review))
        // Comments
        .route(
            "/sessions/{id}/comments",
            get(routes::comments::list_comments),
        )
        .route(
            "/sessions/{id}/comments",
            post(routes::comments::create_comment),
        )
        .route(
            "/comments/{id}/resolve",
            patch(routes::comments::resolve_comment),
        )
        .route(
            "/comments/{id}/unresolve",
            patch(routes::comments::unresolve_comment),
        )
        .route("/comments/{id}", delete(routes::comments::delete_comment));

    Router::new()
        .nest("/api", api)
        // Live updates
        .route("/events", get(routes::events::events))
        // Machine callers
        .route("/mcp", post(rpc::handle))
        // OAuth provider
        .route("/oauth/register", post(routes::oauth::register))
        .route("/oauth/authorize", get(routes::oauth::authorize))
        .route("/oauth/token", post(routes::oauth::token))
        .route("/oauth/revoke", post(routes::oauth::revoke))
        .route(
            "/.well-known/oauth-authorization-server",
            get(routes::oauth::metadata),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(engine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "revline_server=info,revline_engine=info,tower_http=info".into()),
        )
        .init();

    let config_path = std::env::var("REVLINE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE_NAME));
    let config = ServerConfig::load(&config_path)?.apply_env();
    tracing::info!("config loaded from {}", config_path.display());

    let data_dir = std::env::var("REVLINE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"));
    let db = revline_store::init_db(&data_dir)?;
    tracing::info!("database initialized in {}", data_dir.display());

    let port = config.port;
    let engine = Engine::new(db, config);
    let app = build_router(engine);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("listening on port {port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_store::Db;

    #[test]
    fn router_builds_with_every_route() {
        let engine = Engine::new(Db::open_in_memory().unwrap(), ServerConfig::default());
        let _router = build_router(engine);
    }
}
