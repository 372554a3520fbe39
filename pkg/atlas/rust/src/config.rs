// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Server configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::json;

/// Application directory name under the user cache dir.
pub const APP_CACHE_NAME: &str = "embedding_atlas";

/// Where the client runs its analytic database.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DatabaseMode {
    /// In the browser, loading the dataset itself.
    #[default]
    Wasm,
    /// Against this server's `/data/query` endpoint.
    Server,
    /// Against an external REST endpoint (`http://` or `https://`).
    Rest(String),
    /// Against an external socket endpoint (`ws://` or `wss://`).
    Socket(String),
}

impl DatabaseMode {
    /// Connection descriptor merged into `metadata.json` under `database`.
    pub fn descriptor(&self) -> serde_json::Value {
        match self {
            DatabaseMode::Wasm => json!({"type": "wasm", "load": true}),
            DatabaseMode::Server => json!({"type": "rest"}),
            DatabaseMode::Rest(uri) => json!({"type": "rest", "uri": uri, "load": true}),
            DatabaseMode::Socket(uri) => json!({"type": "socket", "uri": uri, "load": true}),
        }
    }
}

impl FromStr for DatabaseMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wasm" => Ok(DatabaseMode::Wasm),
            "server" => Ok(DatabaseMode::Server),
            uri if uri.starts_with("http://") || uri.starts_with("https://") => {
                Ok(DatabaseMode::Rest(uri.to_string()))
            }
            uri if uri.starts_with("ws://") || uri.starts_with("wss://") => {
                Ok(DatabaseMode::Socket(uri.to_string()))
            }
            other => Err(ConfigError::InvalidDatabaseUri(other.to_string())),
        }
    }
}

impl fmt::Display for DatabaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseMode::Wasm => f.write_str("wasm"),
            DatabaseMode::Server => f.write_str("server"),
            DatabaseMode::Rest(uri) | DatabaseMode::Socket(uri) => f.write_str(uri),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Try the next ports when `port` is taken.
    pub auto_port: bool,
    /// Pre-built frontend served at `/`.
    pub static_dir: PathBuf,
    pub database: DatabaseMode,
    /// Root of the artifact and session caches.
    pub cache_root: PathBuf,
    /// Where selection exports write their scratch files.
    pub scratch_dir: PathBuf,
    /// Upper bound of the blocking worker pool.
    pub worker_threads: usize,
}

/// Number of ports tried when auto-port is enabled.
pub const AUTO_PORT_ATTEMPTS: u16 = 10;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5055,
            auto_port: true,
            static_dir: PathBuf::from("static"),
            database: DatabaseMode::default(),
            cache_root: default_cache_root(),
            scratch_dir: std::env::temp_dir(),
            worker_threads: 16,
        }
    }
}

/// Resolve the application cache root.
///
/// `ATLAS_CACHE_DIR` wins, then the XDG cache dir, then `~/.cache`, then the
/// system temp dir.
pub fn default_cache_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("ATLAS_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(dir).join(APP_CACHE_NAME);
    }
    if let Some(home) = std::env::var_os("HOME") {
        #[cfg(target_os = "macos")]
        return PathBuf::from(home).join("Library/Caches").join(APP_CACHE_NAME);
        #[cfg(not(target_os = "macos"))]
        return PathBuf::from(home).join(".cache").join(APP_CACHE_NAME);
    }
    std::env::temp_dir().join(APP_CACHE_NAME)
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid DuckDB uri {0:?}: expected wasm, server, http(s)://... or ws(s)://...")]
    InvalidDatabaseUri(String),
}
