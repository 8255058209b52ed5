//! Queue and worker pool configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::kind::OperationKind;

/// Queue registry and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Milliseconds between lease polls when a kind has no wake-up signal.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Seconds a lease may stay unacknowledged before it counts as stalled.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_seconds: u64,
    /// Seconds to wait for in-flight items on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Terminal items older than this are purged by the clean task.
    #[serde(default = "default_clean_age")]
    pub clean_older_than_hours: i64,
    /// Cron expression (with seconds) for the clean task.
    #[serde(default = "default_clean_schedule")]
    pub clean_schedule: String,
    /// Settings applied to kinds without an explicit entry.
    #[serde(default)]
    pub defaults: QueueKindConfig,
    /// Per-kind overrides keyed by kind name.
    #[serde(default)]
    pub kinds: BTreeMap<String, QueueKindConfig>,
}

/// Settings for a single queue kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueKindConfig {
    /// Maximum concurrently leased items.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts before an item is moved to the dead state.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

impl Default for QueueKindConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            stall_timeout_seconds: default_stall_timeout(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            clean_older_than_hours: default_clean_age(),
            clean_schedule: default_clean_schedule(),
            defaults: QueueKindConfig::default(),
            kinds: BTreeMap::new(),
        }
    }
}

impl QueueConfig {
    /// Resolve the settings for a kind.
    ///
    /// The batch queue always runs with a concurrency of one so that a
    /// single batch fans out at a time.
    pub fn kind_settings(&self, kind: &OperationKind) -> QueueKindConfig {
        let mut settings = self
            .kinds
            .get(kind.as_str())
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        if kind.is_batch() {
            settings.concurrency = 1;
        }
        settings
    }

    /// Every kind that should be registered: built-ins plus configured ones.
    pub fn registered_kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<OperationKind> = OperationKind::builtin();
        for name in self.kinds.keys() {
            let kind = OperationKind::new(name.clone());
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}

fn default_poll_interval() -> u64 {
    500
}

fn default_stall_timeout() -> u64 {
    300
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_clean_age() -> i64 {
    24
}

fn default_clean_schedule() -> String {
    "0 0 * * * *".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5_000
}

fn default_max_retry_delay() -> u64 {
    300_000
}
