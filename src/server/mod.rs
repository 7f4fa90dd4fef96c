//! HTTP persistence endpoint (`POST /api/save-processed`).

use crate::error::{DistillError, Result};
use crate::persistence::{FsStore, PersistenceGateway, SaveRequest, SaveResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Route the save endpoint is mounted on
pub const SAVE_ROUTE: &str = "/api/save-processed";

/// Check if a port is available by attempting to bind to it
async fn check_port_available(port: u16) -> bool {
    tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .is_ok()
}

/// Serves the persistence endpoint over a filesystem store
pub struct PersistenceServer {
    store: Arc<FsStore>,
    allowed_origins: Vec<String>,
}

impl PersistenceServer {
    pub fn new(store: FsStore, allowed_origins: Vec<String>) -> Self {
        Self {
            store: Arc::new(store),
            allowed_origins,
        }
    }

    /// Run the HTTP server until the process is stopped
    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);

        if !check_port_available(port).await {
            return Err(DistillError::Config(format!(
                "Port {} is already in use. Set http_server.port in config.toml to a free port.",
                port
            )));
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            DistillError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", addr, e),
            ))
        })?;

        log::info!("Persistence endpoint: http://{}{}", addr, SAVE_ROUTE);
        log::info!("Writing under {}", self.store.root().display());

        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| DistillError::Io(std::io::Error::other(format!("HTTP server error: {}", e))))
    }

    /// Create the axum router
    pub fn router(&self) -> Router {
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route(SAVE_ROUTE, post(handle_save))
            .route("/health", get(handle_health))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(AppState {
                store: Arc::clone(&self.store),
            })
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<FsStore>,
}

/// Store one processed document
async fn handle_save(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    let request: SaveRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SaveResponse {
                    success: false,
                    path: None,
                    error: Some(format!("Invalid JSON: {}", e)),
                }),
            )
                .into_response();
        }
    };

    match state
        .store
        .store(&request.timestamp, &request.filename, &request.content)
        .await
    {
        Ok(path) => (
            StatusCode::OK,
            Json(SaveResponse {
                success: true,
                path: Some(path.to_string_lossy().to_string()),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            log::error!("Error saving file {}: {}", request.filename, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SaveResponse {
                    success: false,
                    path: None,
                    error: Some("Failed to save file".to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}
