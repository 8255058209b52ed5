//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every section falls back to defaults so an empty
//! configuration is valid.

pub mod batch;
pub mod logging;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod transform;
pub mod upload;
pub mod webhook;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::batch::BatchConfig;
use self::logging::LoggingConfig;
use self::queue::QueueConfig;
use self::realtime::RealtimeConfig;
use self::storage::StorageConfig;
use self::transform::TransformCommandConfig;
use self::upload::UploadConfig;
use self::webhook::WebhookConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Queue registry and worker pool settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Chunked upload session settings.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Batch fan-out settings.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Outbound webhook settings.
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Event bus settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Artifact storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// External transform programs keyed by operation kind.
    #[serde(default)]
    pub transforms: BTreeMap<String, TransformCommandConfig>,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `MEDIAFLOW_`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MEDIAFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
