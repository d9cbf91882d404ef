//! XPBoard HTTP server
//!
//! Serves the dashboard's query endpoint, the mock sign-in endpoint and the
//! built single-page app from one axum router.

pub mod auth;
pub mod config;
pub mod error;
pub mod graphql;
pub mod server;

pub use config::{LoggingConfig, ServerConfig};
pub use error::ApiError;
pub use server::{DashboardServer, build_router};

use std::sync::Arc;
use xpboard_core::RecordRepository;

/// Shared application state for the handlers
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn RecordRepository>,
    pub config: Arc<ServerConfig>,
}
