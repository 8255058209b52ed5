//! Worker log output.

use serde::{Deserialize, Serialize};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human readable output.
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset, e.g. `"info,mediaflow_worker=debug"`.
    #[serde(default = "default_filter")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Tag JSON lines with the worker thread id.
    #[serde(default = "default_thread_ids")]
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_filter(),
            format: LogFormat::default(),
            thread_ids: default_thread_ids(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_thread_ids() -> bool {
    true
}
