//! HTTP API (axum).

mod backgrounds;
mod import;
mod notes;
mod pomodoro;
mod settings;
mod todos;

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, State},
    http::{Method, StatusCode},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::asset_store::{AssetStore, StorageMode};
use crate::config::ServerConfig;
use crate::db::DbHandle;
use crate::error::ServerError;
use crate::library::AssetLibrary;
use crate::reconcile::Reconciler;

/// Headroom above the upload cap for multipart framing and the other form
/// fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: DbHandle,
    pub store: Arc<AssetStore>,
    pub library: AssetLibrary,
    pub reconciler: Reconciler,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state.library.max_upload_size() + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_check))
        // Backgrounds
        .route("/api/backgrounds", get(backgrounds::list))
        .route("/api/backgrounds/upload", post(backgrounds::upload))
        .route("/api/backgrounds/sync", post(backgrounds::sync))
        .route("/api/backgrounds/validate", get(backgrounds::validate))
        .route("/api/backgrounds/file/:filename", get(backgrounds::serve_file))
        .route("/api/backgrounds/:id", delete(backgrounds::remove))
        .route(
            "/api/settings/background",
            get(backgrounds::get_selection)
                .post(backgrounds::set_selection)
                .delete(backgrounds::clear_selection),
        )
        // Generic settings
        .route("/api/settings", get(settings::list).post(settings::update_many))
        .route(
            "/api/settings/:key",
            get(settings::fetch)
                .put(settings::update)
                .delete(settings::remove),
        )
        // Notes
        .route("/api/notes", get(notes::list).post(notes::create))
        .route("/api/notes/import", post(notes::import))
        .route(
            "/api/notes/:id",
            get(notes::fetch).put(notes::update).delete(notes::remove),
        )
        // Todos
        .route("/api/todos", get(todos::list).post(todos::create))
        .route("/api/todos/stats", get(todos::stats))
        .route("/api/todos/categories", get(todos::categories))
        .route("/api/todos/import", post(todos::import))
        .route(
            "/api/todos/:id",
            get(todos::fetch).put(todos::update).delete(todos::remove),
        )
        .route("/api/todos/:id/toggle", patch(todos::toggle))
        // Pomodoro
        .route(
            "/api/pomodoro/sessions",
            get(pomodoro::list).post(pomodoro::create),
        )
        .route("/api/pomodoro/stats", get(pomodoro::stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map a multipart read failure, keeping the body-limit case distinct.
fn multipart_error(state: &AppState, e: MultipartError) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge {
            max: state.library.max_upload_size(),
        }
    } else {
        ServerError::BadRequest(format!("Multipart error: {}", e))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: match state.config.storage_mode {
            StorageMode::Filesystem => "filesystem",
            StorageMode::Inline => "inline",
        },
    })
}

pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
