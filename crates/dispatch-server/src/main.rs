use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router, middleware,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use dispatch_api::auth::{self, AppState, AppStateInner};
use dispatch_api::discussions;
use dispatch_api::messages;
use dispatch_api::middleware::require_auth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("DISPATCH_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("DISPATCH_DB_PATH").unwrap_or_else(|_| "dispatch.db".into());
    let host = std::env::var("DISPATCH_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("DISPATCH_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = dispatch_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner { db, jwt_secret });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route(
            "/api/discussions",
            get(discussions::list_discussions).post(discussions::create_discussion),
        )
        .route(
            "/api/discussions/cleanup-duplicates",
            post(discussions::cleanup_duplicates),
        )
        .route(
            "/api/discussions/{discussion_id}",
            get(discussions::get_discussion).delete(discussions::leave_discussion),
        )
        .route("/api/discussions/{discussion_id}/pin", patch(discussions::set_pinned))
        .route("/api/discussions/{discussion_id}/mute", patch(discussions::set_muted))
        .route("/api/discussions/{discussion_id}/read", patch(discussions::mark_read))
        .route(
            "/api/discussions/{discussion_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/api/discussions/{discussion_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/api/discussions/{discussion_id}/messages/{message_id}/reactions",
            post(messages::toggle_reaction),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let app = Router::new()
        .route("/health", get(health))
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Dispatch server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
