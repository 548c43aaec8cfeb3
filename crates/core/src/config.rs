//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8220").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8220".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Upload session limits and policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest file size accepted at initiation, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Upper bound for a single chunk, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Chunk count a file is split into until chunks reach `max_chunk_size`.
    #[serde(default = "default_target_chunk_count")]
    pub target_chunk_count: u64,
    /// Maximum number of concurrently open upload sessions.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// Maximum number of chunks processed concurrently for one session.
    /// Also bounds how many out-of-order chunks are buffered for hashing.
    #[serde(default = "default_max_parallel_chunks")]
    pub max_parallel_chunks: usize,
    /// How long a chunk may wait for earlier chunks before being rejected.
    #[serde(default = "default_ordering_wait_timeout_ms")]
    pub ordering_wait_timeout_ms: u64,
    /// Idle time after which an unfinished session is reclaimed.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// How long finished sessions stay queryable before eviction.
    #[serde(default = "default_terminal_retention_secs")]
    pub terminal_retention_secs: u64,
    /// Interval between reclamation sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum size of an initiation request body, in bytes.
    #[serde(default = "default_max_initiate_body_size")]
    pub max_initiate_body_size: usize,
}

fn default_max_file_size() -> u64 {
    crate::MAX_FILE_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_target_chunk_count() -> u64 {
    crate::DEFAULT_TARGET_CHUNK_COUNT
}

fn default_max_concurrent_uploads() -> usize {
    3
}

fn default_max_parallel_chunks() -> usize {
    4
}

fn default_ordering_wait_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_secs() -> u64 {
    3600 // 1 hour
}

fn default_terminal_retention_secs() -> u64 {
    600 // 10 minutes
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_initiate_body_size() -> usize {
    2 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_chunk_size: default_max_chunk_size(),
            target_chunk_count: default_target_chunk_count(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_parallel_chunks: default_max_parallel_chunks(),
            ordering_wait_timeout_ms: default_ordering_wait_timeout_ms(),
            session_timeout_secs: default_session_timeout_secs(),
            terminal_retention_secs: default_terminal_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_initiate_body_size: default_max_initiate_body_size(),
        }
    }
}

impl UploadConfig {
    pub fn ordering_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.ordering_wait_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }

    /// Sweep interval, never zero (tokio intervals panic on zero).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Validate upload limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_size == 0 {
            return Err("upload.max_file_size must be greater than 0".to_string());
        }
        if self.max_chunk_size == 0 {
            return Err("upload.max_chunk_size must be greater than 0".to_string());
        }
        if self.target_chunk_count == 0 {
            return Err("upload.target_chunk_count must be greater than 0".to_string());
        }
        if self.max_concurrent_uploads == 0 {
            return Err("upload.max_concurrent_uploads must be greater than 0".to_string());
        }
        if self.max_parallel_chunks == 0 {
            return Err("upload.max_parallel_chunks must be greater than 0".to_string());
        }
        // Chunk indices are u32.
        if self.max_file_size.div_ceil(self.max_chunk_size) > u64::from(u32::MAX) {
            return Err(format!(
                "upload.max_file_size {} would need more than {} chunks of {} bytes",
                self.max_file_size,
                u32::MAX,
                self.max_chunk_size
            ));
        }
        Ok(())
    }
}

/// Document store backend configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store; contents are lost on restart.
    #[default]
    Memory,
    /// Local filesystem store.
    Filesystem {
        /// Root directory for documents.
        path: PathBuf,
    },
}

impl StoreConfig {
    /// Validate store configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    Err("store.path must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload limits and policy.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Document store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the in-memory store and disables metrics.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                metrics_enabled: false,
                ..ServerConfig::default()
            },
            upload: UploadConfig::default(),
            store: StoreConfig::Memory,
        }
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.upload.validate()?;
        self.store.validate()
    }
}
