//! Chunked upload session configuration.

use serde::{Deserialize, Serialize};

/// Chunked upload session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size used when the client does not provide one (default 5 MiB).
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size_bytes: u64,
    /// Largest accepted declared file size (default 10 GiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Hours after creation at which an unfinished session expires.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: i64,
    /// Hours a finished session record is retained before it is purged.
    #[serde(default = "default_retention")]
    pub retention_hours: i64,
    /// Cron expression (with seconds) for the expiry sweep.
    #[serde(default = "default_sweep_schedule")]
    pub sweep_schedule: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_chunk_size_bytes: default_chunk_size(),
            max_file_size_bytes: default_max_file_size(),
            session_ttl_hours: default_session_ttl(),
            retention_hours: default_retention(),
            sweep_schedule: default_sweep_schedule(),
        }
    }
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_session_ttl() -> i64 {
    24
}

fn default_retention() -> i64 {
    24
}

fn default_sweep_schedule() -> String {
    "0 * * * * *".to_string()
}
