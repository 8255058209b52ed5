//! Topic definitions and parsing.

use std::fmt;

use mediaflow_core::types::{BatchId, JobId, UploadId};

/// Typed event bus topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Progress of one job.
    Job(JobId),
    /// Progress of one batch.
    Batch(BatchId),
    /// Every batch of a tenant or group.
    Group(String),
    /// Progress of one upload session.
    Upload(UploadId),
}

impl Topic {
    /// Parses a topic string such as `job:<uuid>`.
    pub fn parse(topic: &str) -> Option<Self> {
        let (prefix, id) = topic.split_once(':')?;
        match prefix {
            "job" => id.parse().ok().map(Topic::Job),
            "batch" => id.parse().ok().map(Topic::Batch),
            "upload" => id.parse().ok().map(Topic::Upload),
            "group" if !id.is_empty() => Some(Topic::Group(id.to_string())),
            _ => None,
        }
    }

    /// Whether the topic follows a single source with a terminal state.
    pub fn is_per_source(&self) -> bool {
        !matches!(self, Topic::Group(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Job(id) => write!(f, "job:{id}"),
            Topic::Batch(id) => write!(f, "batch:{id}"),
            Topic::Group(name) => write!(f, "group:{name}"),
            Topic::Upload(id) => write!(f, "upload:{id}"),
        }
    }
}
