//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::asset_store::StorageMode;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./instance/notebook.db`
    pub database_path: PathBuf,

    /// Directory holding uploaded backgrounds and their thumbnails.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads/backgrounds`
    pub upload_dir: PathBuf,

    /// Maximum upload size in bytes (50 MiB).
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// How long an upload/delete/sync waits for the catalog writer lock
    /// before failing with a retryable error.
    /// Env: `LOCK_TIMEOUT_SECS`
    /// Default: 30 seconds
    pub lock_timeout: Duration,

    /// Where uploaded bytes go. `Inline` is for deployments without a
    /// writable filesystem.
    /// Env: `INLINE_STORAGE` (true/false), or `VERCEL=1` / `VERCEL_ENV` set
    /// Default: filesystem
    pub storage_mode: StorageMode,

    /// Validate the catalog at boot and reconcile it if inconsistent.
    /// Env: `SYNC_ON_STARTUP` (true/false)
    /// Default: `true`
    pub sync_on_startup: bool,

    /// Operator confirmation for destructive catalog rebuilds (discarding a
    /// corrupt legacy catalog, dropping unreadable rows).
    /// Env: `CATALOG_REBUILD` (true/false)
    /// Default: `false`
    pub catalog_rebuild: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 5000).into(),
            database_path: PathBuf::from("./instance/notebook.db"),
            upload_dir: PathBuf::from("./uploads/backgrounds"),
            max_upload_size: 50 * 1024 * 1024, // 50 MiB
            lock_timeout: Duration::from_secs(30),
            storage_mode: StorageMode::Filesystem,
            sync_on_startup: true,
            catalog_rebuild: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. `from_env` passes
    /// the process environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("LOCK_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.lock_timeout = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %val, "Invalid LOCK_TIMEOUT_SECS, using default"),
            }
        }

        let inline = lookup("INLINE_STORAGE").map(|v| parse_flag(&v)).unwrap_or(false)
            || lookup("VERCEL").as_deref() == Some("1")
            || lookup("VERCEL_ENV").is_some();
        if inline {
            config.storage_mode = StorageMode::Inline;
        }

        if let Some(val) = lookup("SYNC_ON_STARTUP") {
            config.sync_on_startup = parse_flag(&val);
        }

        if let Some(val) = lookup("CATALOG_REBUILD") {
            config.catalog_rebuild = parse_flag(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_flag(val: &str) -> bool {
    !matches!(val.trim(), "" | "0" | "false" | "no" | "off")
}
