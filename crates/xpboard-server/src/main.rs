//! XPBoard dashboard server
//!
//! Usage:
//! ```bash
//! # Serve the dashboard (default command)
//! xpboard-server --config xpboard.yaml
//!
//! # Environment variables override the config file
//! XPBOARD_PORT=9000 xpboard-server serve
//!
//! # Watch a token storage file and log when the session ends
//! xpboard-server watch-token --storage ~/.xpboard/storage.json
//! ```
//!
//! Sign in and query:
//! ```bash
//! TOKEN=$(curl -s -X POST -u student:student123 http://localhost:8080/api/auth/signin | tr -d '"')
//! curl http://localhost:8080/graphql \
//!   -H "Authorization: Bearer $TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"operation": "xp_by_project", "variables": {"limit": 5}}'
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use xpboard_core::InMemoryRepository;
use xpboard_server::{DashboardServer, ServerConfig, server::shutdown_signal};
use xpboard_session::{FileStorage, LogNavigator, MonitorConfig, ValidityMonitor};

/// XPBoard Server - student progress dashboard backend
#[derive(Parser)]
#[command(name = "xpboard-server")]
#[command(about = "Serves the XPBoard dashboard and its query API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "XPBOARD_CONFIG",
        global = true
    )]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dashboard server (default if no command specified)
    Serve,
    /// Watch a token storage file and redirect to sign-in when the session ends
    WatchToken {
        /// Path to the JSON storage file
        #[arg(long, default_value = "~/.xpboard/storage.json")]
        storage: PathBuf,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        poll_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env();

    init_tracing(&config)?;

    if let Some(path) = &cli.config {
        info!("📁 Loaded configuration from: {}", path);
    }

    match cli.command {
        Some(Commands::WatchToken { storage, poll_ms }) => watch_token(&storage, poll_ms).await,
        Some(Commands::Serve) | None => {
            let repository = Arc::new(InMemoryRepository::mock());
            DashboardServer::new(config, repository).serve().await
        }
    }
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));
    // File watcher internals are noisy at debug
    match "notify=warn".parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Warning: Failed to set notify log filter: {}", e),
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Expand a leading `~` to the home directory
fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

async fn watch_token(storage: &Path, poll_ms: u64) -> anyhow::Result<()> {
    let path = expand_tilde(storage);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let storage = Arc::new(FileStorage::open(&path)?);
    let monitor_config = MonitorConfig {
        poll_interval: Duration::from_millis(poll_ms.max(1)),
        ..MonitorConfig::default()
    };

    let handle =
        ValidityMonitor::new(storage, Arc::new(LogNavigator), monitor_config).spawn();

    let mut validity = handle.validity();
    let reporter = tokio::spawn(async move {
        while validity.changed().await.is_ok() {
            let valid = *validity.borrow_and_update();
            info!("Session is {}", if valid { "valid" } else { "not valid" });
        }
    });

    info!("👀 Watching {:?} (Ctrl+C to stop)", path);
    shutdown_signal().await;

    handle.shutdown().await;
    reporter.abort();
    Ok(())
}
