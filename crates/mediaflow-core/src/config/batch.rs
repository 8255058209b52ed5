//! Batch coordinator configuration.

use serde::{Deserialize, Serialize};

/// Batch fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of member jobs submitted together before waiting for the
    /// whole group to finish.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            group_size: default_group_size(),
        }
    }
}

fn default_group_size() -> usize {
    3
}
