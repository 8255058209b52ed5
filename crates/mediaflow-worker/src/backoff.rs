//! Retry backoff policies for queue items.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mediaflow_core::config::queue::QueueKindConfig;

/// How long a failed item waits before it is redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Redeliver immediately.
    None,
    /// Wait the same delay after every failure.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Wait `base * 2^(attempt - 1)`, capped at `max`.
    Exponential {
        /// Delay after the first failure, in milliseconds.
        base_ms: u64,
        /// Upper bound, in milliseconds.
        max_ms: u64,
    },
}

impl BackoffPolicy {
    /// Delay before redelivering an item whose `attempt`-th try failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { base_ms, max_ms } => {
                let exp = attempt.saturating_sub(1).min(32);
                let delay = base_ms.saturating_mul(1u64 << exp);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

impl From<&QueueKindConfig> for BackoffPolicy {
    fn from(config: &QueueKindConfig) -> Self {
        if config.retry_delay_ms == 0 {
            Self::None
        } else {
            Self::Exponential {
                base_ms: config.retry_delay_ms,
                max_ms: config.max_retry_delay_ms,
            }
        }
    }
}
