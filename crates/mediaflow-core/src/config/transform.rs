//! External command transform configuration.

use serde::{Deserialize, Serialize};

/// An external program invoked for one operation kind.
///
/// `args` may contain the placeholders `{input}` and `{output}`, which are
/// replaced with scratch file paths, and `{param.<name>}`, which is
/// replaced with the job parameter of that name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformCommandConfig {
    /// Program to execute (looked up on `PATH`).
    pub program: String,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extension of the produced file, also reported as its format.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Seconds after which the program is killed.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_output_format() -> String {
    "bin".to_string()
}

fn default_timeout() -> u64 {
    3600
}
