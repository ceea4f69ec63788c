use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Core error type for a research run.
///
/// Only failures of strictly sequential stages surface here; failures local to one unit
/// of parallel work are absorbed where they happen (see [`WorkerFailure`] and
/// [`AggregatorFailure`]).
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("scoping failed: {0}")]
    Scoping(String),
    #[error("report synthesis failed: {0}")]
    Report(String),
    #[error("research brief is empty")]
    EmptyBrief,
    #[error("run cancelled: {0}")]
    Cancelled(String),
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("workflow error: {0}")]
    Workflow(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// A delegated topic whose research loop failed; the supervisor records no note for it.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    pub topic: String,
    pub reason: String,
    /// Tool calls consumed before the failure, still charged to the global budget.
    pub tool_calls: u32,
}

impl WorkerFailure {
    pub fn new(topic: impl Into<String>, reason: impl Into<String>, tool_calls: u32) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
            tool_calls,
        }
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker failure on \"{}\" after {} tool call(s): {}",
            self.topic, self.tool_calls, self.reason
        )
    }
}

impl std::error::Error for WorkerFailure {}

/// A single search query or result that could not be fetched or summarised.
#[derive(Debug, Clone)]
pub struct AggregatorFailure {
    /// The url of the dropped result, or the query text when the whole query failed.
    pub subject: String,
    pub reason: String,
}

impl AggregatorFailure {
    pub fn new(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AggregatorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aggregator dropped {}: {}", self.subject, self.reason)
    }
}

impl std::error::Error for AggregatorFailure {}
