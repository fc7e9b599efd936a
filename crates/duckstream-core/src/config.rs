//! Server Configuration
//!
//! Configuration is read once at startup from the environment and then passed
//! around as an immutable value; nothing here is global.
//!
//! ## Required variables
//!
//! - `HOST`, `PORT`: listen address
//! - `TEMP_DOWNLOAD_DIR`: remote downloads and export artifacts
//! - `TEMP_DUCKDB_DIR`: DuckDB spill directory (`temp_directory`)
//! - `DUCKDB_DIR`: one `<session-id>.duckdb` file per session
//! - `CHUNK_SIZE`: rows per Arrow chunk
//! - `FILE_CHUNK_SIZE`: bytes per exported-file chunk
//!
//! ## Optional variables
//!
//! - `DUCKDB_MEMORY_LIMIT` (default: `2GB`)
//! - `PARQUET_ENCRYPTION_KEY`: 16, 24 or 32 byte key; encrypted exports are
//!   rejected when unset
//! - `STREAM_CHANNEL_CAPACITY`: chunks buffered between engine and RPC
//!   stream (default: 2)
//! - `DOWNLOAD_TIMEOUT_SECS` (default: 300)
//!
//! ## Usage
//!
//! ```ignore
//! use duckstream_core::ServerConfig;
//!
//! let config = ServerConfig::from_env()?;
//! config.ensure_dirs()?;
//! println!("listening on {}", config.bind_addr());
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name the Parquet footer key is registered under in every engine.
pub const PARQUET_KEY_NAME: &str = "key256";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-wide DuckDB tuning applied to every engine on open.
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// `SET memory_limit` value (default: 2GB)
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// `SET temp_directory` value, where DuckDB spills
    pub temp_dir: PathBuf,

    /// Parquet footer encryption key, registered as [`PARQUET_KEY_NAME`]
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSettings")
            .field("memory_limit", &self.memory_limit)
            .field("temp_dir", &self.temp_dir)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl EngineSettings {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_limit: default_memory_limit(),
            temp_dir: temp_dir.into(),
            encryption_key: None,
        }
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }
}

/// Chunking parameters for both streamers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Rows per Arrow chunk
    pub chunk_rows: usize,

    /// Bytes per exported-file chunk
    pub file_chunk_bytes: usize,

    /// Chunks buffered between the engine task and the RPC stream (default: 2)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_rows: 10_000,
            file_chunk_bytes: 1024 * 1024, // 1MB
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Remote downloads and export artifacts
    pub download_dir: PathBuf,

    /// Session database files
    pub session_dir: PathBuf,

    /// Timeout for a whole remote download (default: 300s)
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    pub engine: EngineSettings,

    pub stream: StreamSettings,
}

fn default_memory_limit() -> String {
    "2GB".to_string()
}

fn default_channel_capacity() -> usize {
    2
}

fn default_download_timeout_secs() -> u64 {
    300 // 5 minutes
}

impl ServerConfig {
    /// Build a config rooted in `base`, with `downloads/`, `spill/` and
    /// `sessions/` subdirectories. Used by tests and local tooling.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            download_dir: base.join("downloads"),
            session_dir: base.join("sessions"),
            download_timeout_secs: default_download_timeout_secs(),
            engine: EngineSettings::new(base.join("spill")),
            stream: StreamSettings::default(),
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let host = required("HOST")?;
        let port = parse::<u16>("PORT", required("PORT")?)?;
        let download_dir = PathBuf::from(required("TEMP_DOWNLOAD_DIR")?);
        let spill_dir = PathBuf::from(required("TEMP_DUCKDB_DIR")?);
        let session_dir = PathBuf::from(required("DUCKDB_DIR")?);
        let chunk_rows = positive("CHUNK_SIZE", required("CHUNK_SIZE")?)?;
        let file_chunk_bytes = positive("FILE_CHUNK_SIZE", required("FILE_CHUNK_SIZE")?)?;

        let channel_capacity = match lookup("STREAM_CHANNEL_CAPACITY") {
            Some(v) => positive("STREAM_CHANNEL_CAPACITY", v)?,
            None => default_channel_capacity(),
        };
        let download_timeout_secs = match lookup("DOWNLOAD_TIMEOUT_SECS") {
            Some(v) => parse::<u64>("DOWNLOAD_TIMEOUT_SECS", v)?,
            None => default_download_timeout_secs(),
        };

        let encryption_key = match lookup("PARQUET_ENCRYPTION_KEY") {
            Some(key) if !key.is_empty() => {
                if ![16, 24, 32].contains(&key.len()) {
                    return Err(ConfigError::Invalid {
                        key: "PARQUET_ENCRYPTION_KEY",
                        value: "<redacted>".to_string(),
                        reason: format!("key must be 16, 24 or 32 bytes, got {}", key.len()),
                    });
                }
                if key.contains('\'') {
                    return Err(ConfigError::Invalid {
                        key: "PARQUET_ENCRYPTION_KEY",
                        value: "<redacted>".to_string(),
                        reason: "key must not contain quotes".to_string(),
                    });
                }
                Some(key)
            }
            _ => None,
        };

        Ok(Self {
            host,
            port,
            download_dir,
            session_dir,
            download_timeout_secs,
            engine: EngineSettings {
                memory_limit: lookup("DUCKDB_MEMORY_LIMIT")
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(default_memory_limit),
                temp_dir: spill_dir,
                encryption_key,
            },
            stream: StreamSettings {
                chunk_rows,
                file_chunk_bytes,
                channel_capacity,
            },
        })
    }

    /// Create every configured directory that does not exist yet.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.download_dir, &self.session_dir, &self.engine.temp_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.clone(),
        reason: e.to_string(),
    })
}

fn positive(key: &'static str, value: String) -> Result<usize, ConfigError> {
    let n = parse::<usize>(key, value.clone())?;
    if n == 0 {
        return Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(n)
}
