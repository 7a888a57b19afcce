//! Environment-based Configuration
//!
//! All settings load from environment variables with sane defaults, so the
//! service runs unconfigured for local development and is fully
//! parameterized in deployment.
//!
//! # Environment Variables
//!
//! - `CANOPY_DB_PATH` - SQLite database path (default: "canopy.db")
//! - `CANOPY_FILES_DIR` - Directory published tree files are written to
//! - `CANOPY_DOWNLOAD_DIR` - Directory downloaded files land in
//! - `CANOPY_GROUP_FILES_BY_STORE` - "1" to place files under per-store directories
//! - `CANOPY_FETCH_INTERVAL_SECS` - Seconds between sync cycles (default: 60)
//! - `CANOPY_DOWNLOAD_TIMEOUT_SECS` - Total deadline per download (default: 30)
//! - `CANOPY_CONNECT_TIMEOUT_SECS` - Connect deadline for HTTP clients (default: 10)
//! - `CANOPY_WALLET_RPC` - Base URL of the wallet RPC service
//! - `CANOPY_UPLOAD_SERVERS` - Comma-separated mirror URLs to upload to
//! - `CANOPY_HEADERS` - JSON object of custom HTTP headers sent on every
//!   transport request
//! - `CANOPY_API_PORT` - REST API port (default: 3000)
//! - `CANOPY_LOG_LEVEL` - trace | debug | info | warn | error
//! - `CANOPY_LOG_JSON` - "1" for JSON log output

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::sync::SyncConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub db_path: PathBuf,

    /// Where published tree files are written
    pub files_dir: PathBuf,

    /// Where downloaded files land before validation
    pub download_dir: PathBuf,

    /// Place files under a per-store directory
    pub group_files_by_store: bool,

    /// Seconds between sync cycles
    pub fetch_interval_secs: u64,

    /// Total deadline for one file download
    pub download_timeout_secs: u64,

    /// Connect deadline for HTTP clients
    pub connect_timeout_secs: u64,

    /// Wallet RPC base URL
    pub wallet_rpc_url: String,

    /// Mirrors that receive published files
    pub upload_servers: Vec<String>,

    /// Custom headers forwarded verbatim on every transport request
    pub custom_headers: HashMap<String, String>,

    /// REST API port
    pub api_port: u16,

    /// Log level
    pub log_level: String,

    /// Emit JSON log lines
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = PathBuf::from(env::var("CANOPY_DB_PATH").unwrap_or_else(|_| "canopy.db".into()));
        let files_dir =
            PathBuf::from(env::var("CANOPY_FILES_DIR").unwrap_or_else(|_| "server_files".into()));
        let download_dir =
            PathBuf::from(env::var("CANOPY_DOWNLOAD_DIR").unwrap_or_else(|_| "downloads".into()));

        let group_files_by_store = flag("CANOPY_GROUP_FILES_BY_STORE");
        let fetch_interval_secs = parsed("CANOPY_FETCH_INTERVAL_SECS", 60)?;
        let download_timeout_secs = parsed("CANOPY_DOWNLOAD_TIMEOUT_SECS", 30)?;
        let connect_timeout_secs = parsed("CANOPY_CONNECT_TIMEOUT_SECS", 10)?;

        let wallet_rpc_url =
            env::var("CANOPY_WALLET_RPC").unwrap_or_else(|_| "http://localhost:9256".into());

        let upload_servers = env::var("CANOPY_UPLOAD_SERVERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let custom_headers = match env::var("CANOPY_HEADERS") {
            Err(_) => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                ConfigError::InvalidValue("CANOPY_HEADERS".into(), format!("not a JSON object: {}", e))
            })?,
        };

        let api_port = parsed("CANOPY_API_PORT", 3000)? as u16;
        let log_level = env::var("CANOPY_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        let log_json = flag("CANOPY_LOG_JSON");

        Ok(Self {
            db_path,
            files_dir,
            download_dir,
            group_files_by_store,
            fetch_interval_secs,
            download_timeout_secs,
            connect_timeout_secs,
            wallet_rpc_url,
            upload_servers,
            custom_headers,
            api_port,
            log_level,
            log_json,
        })
    }

    /// The sync scheduler's slice of the configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            fetch_data_interval_secs: self.fetch_interval_secs,
            download_timeout_secs: self.download_timeout_secs,
            files_dir: self.files_dir.clone(),
            download_dir: self.download_dir.clone(),
            group_files_by_store: self.group_files_by_store,
            upload_servers: self.upload_servers.clone(),
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== canopy configuration ===");
        println!("Database: {}", self.db_path.display());
        println!("Files dir: {}", self.files_dir.display());
        println!("Download dir: {}", self.download_dir.display());
        println!("Group files by store: {}", self.group_files_by_store);
        println!("Fetch interval: {} seconds", self.fetch_interval_secs);
        println!("Download timeout: {} seconds", self.download_timeout_secs);
        println!("Wallet RPC: {}", self.wallet_rpc_url);
        println!("Upload servers: {}", self.upload_servers.join(", "));
        println!("API port: {}", self.api_port);
        println!("Log level: {}", self.log_level);
        println!("============================");
    }
}

fn flag(name: &str) -> bool {
    env::var(name).map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true")).unwrap_or(false)
}

fn parsed(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.into(), format!("not a number: {}", raw))),
    }
}
