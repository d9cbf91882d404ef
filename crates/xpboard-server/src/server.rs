//! Router assembly and the listening server

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use xpboard_core::RecordRepository;

use crate::config::ServerConfig;
use crate::{AppState, auth, graphql};

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: None,
    })
}

/// Build the router with all routes.
///
/// Requests that match no route are served from the static build directory,
/// and unknown paths get `index.html` so client-side routes like `/profile`
/// load the app.
pub fn build_router(state: AppState) -> Router {
    let static_dir = Path::new(&state.config.static_dir);
    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .route("/graphql", post(graphql::graphql_handler))
        .route("/api/auth/signin", post(auth::signin))
        .route("/healthz", get(healthz))
        .fallback_service(spa)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Dashboard server
pub struct DashboardServer {
    config: Arc<ServerConfig>,
    repository: Arc<dyn RecordRepository>,
}

impl DashboardServer {
    pub fn new(config: ServerConfig, repository: Arc<dyn RecordRepository>) -> Self {
        Self {
            config: Arc::new(config),
            repository,
        }
    }

    /// Bind and serve until a shutdown signal arrives
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

        if !Path::new(&self.config.static_dir).join("index.html").exists() {
            warn!(
                "No index.html in '{}', only the API will be useful",
                self.config.static_dir
            );
        }

        let router = build_router(AppState {
            repository: self.repository,
            config: self.config.clone(),
        });

        info!("📊 XPBoard server starting on http://{}", addr);
        info!("   Dashboard:  http://{}/", addr);
        info!("   Queries:    http://{}/graphql", addr);
        info!("   Sign-in:    http://{}/api/auth/signin", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
