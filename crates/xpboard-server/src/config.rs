use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the built single-page app
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Lifetime of tokens issued by the mock sign-in endpoint
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            token_ttl_secs: default_token_ttl_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("XPBOARD_HOST") {
            self.host = val;
        }

        if let Ok(val) = std::env::var("XPBOARD_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid XPBOARD_PORT '{}', using {}", val, self.port),
            }
        }

        if let Ok(val) = std::env::var("XPBOARD_STATIC_DIR") {
            self.static_dir = val;
        }

        if let Ok(val) = std::env::var("XPBOARD_TOKEN_TTL_SECS")
            && let Ok(ttl) = val.parse::<u64>()
        {
            self.token_ttl_secs = ttl;
        }

        if let Ok(val) = std::env::var("XPBOARD_LOG_LEVEL") {
            self.logging.level = val;
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> String {
    "./build".to_string()
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}
