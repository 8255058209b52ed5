//! Unified application error types for MediaFlow.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Every failure is scoped to a single
//! upload session, job, or batch; nothing here is fatal to the process.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Malformed or missing input, rejected before any state change.
    Validation,
    /// Unknown session, job, batch, queue kind, or queue item.
    NotFound,
    /// Illegal state transition (e.g. adding files to a started batch).
    Conflict,
    /// The external transform failed.
    Transform,
    /// A resource limit was hit (expired session, chunk index out of range).
    ResourceLimit,
    /// A webhook could not be delivered.
    Delivery,
    /// An artifact storage I/O error occurred.
    Storage,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// A configuration error occurred.
    Configuration,
    /// An internal error occurred.
    Internal,
    /// The component is shutting down or otherwise unavailable.
    ServiceUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "VALIDATION"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::Transform => write!(f, "TRANSFORM"),
            Self::ResourceLimit => write!(f, "RESOURCE_LIMIT"),
            Self::Delivery => write!(f, "DELIVERY"),
            Self::Storage => write!(f, "STORAGE"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Internal => write!(f, "INTERNAL"),
            Self::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
        }
    }
}

/// Stable machine-readable error codes attached to [`AppError::code`].
pub mod codes {
    /// The queue kind is not registered.
    pub const UNKNOWN_KIND: &str = "UNKNOWN_KIND";
    /// The queue item does not exist in the given kind.
    pub const UNKNOWN_ITEM: &str = "UNKNOWN_ITEM";
    /// Files were added to a batch that already left `pending`.
    pub const BATCH_ALREADY_STARTED: &str = "BATCH_ALREADY_STARTED";
    /// The batch already reached a terminal status.
    pub const BATCH_TERMINAL: &str = "BATCH_TERMINAL";
    /// The job already reached a terminal status.
    pub const JOB_TERMINAL: &str = "JOB_TERMINAL";
    /// Another delivery of the job is still running.
    pub const ATTEMPT_IN_PROGRESS: &str = "ATTEMPT_IN_PROGRESS";
    /// The write comes from a delivery that no longer owns the job.
    pub const STALE_ATTEMPT: &str = "STALE_ATTEMPT";
    /// The job belongs to a batch and must be controlled through it.
    pub const MEMBER_JOB: &str = "MEMBER_JOB";
    /// The upload session does not exist.
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    /// The upload session passed its expiry time.
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    /// The upload session already assembled its artifact.
    pub const SESSION_ALREADY_COMPLETED: &str = "SESSION_ALREADY_COMPLETED";
    /// The upload session was cancelled or failed.
    pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
    /// The chunk index is outside `0..expected_chunks`.
    pub const INVALID_CHUNK_INDEX: &str = "INVALID_CHUNK_INDEX";
}

/// The unified application error used throughout MediaFlow.
///
/// All crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional stable code refining the kind.
    pub code: Option<&'static str>,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: Some(Box::new(source)),
        }
    }

    /// Attach a stable error code.
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Whether this error carries the given code.
    pub fn has_code(&self, code: &str) -> bool {
        self.code == Some(code)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a transform error.
    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transform, message)
    }

    /// Create a resource-limit error.
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceLimit, message)
    }

    /// Create a delivery error.
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Delivery, message)
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a service-unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    /// Errors returned synchronously to the caller without any state change.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::Conflict
                | ErrorKind::ResourceLimit
        )
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            code: self.code,
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Storage, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::with_source(
            ErrorKind::Validation,
            format!("Invalid input: {err}"),
            err,
        )
    }
}
