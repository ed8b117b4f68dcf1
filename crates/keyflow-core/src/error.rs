use thiserror::Error;

use crate::types::NodeId;

/// Every failure the engine can report.
///
/// Variants carry owned strings rather than foreign error types so a single
/// terminal failure can be cloned out to any number of waiters unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    // Processing errors (returned by node processing functions)
    #[error("processing failed: {0}")]
    Processing(String),

    // Run failures
    #[error("node {node} ({output}) failed: {source}")]
    NodeFailed {
        node: NodeId,
        output: String,
        #[source]
        source: Box<FlowError>,
    },

    #[error("node {node} ({output}) timed out after {timeout_ms}ms")]
    NodeTimeout {
        node: NodeId,
        output: String,
        timeout_ms: u64,
    },

    #[error("node {node} ({output}) panicked")]
    NodePanicked { node: NodeId, output: String },

    #[error("run stalled after {idle_ms}ms; unsatisfiable inputs: {missing:?}")]
    Stalled { missing: Vec<String>, idle_ms: u64 },

    #[error("run cancelled")]
    Cancelled,

    // Usage errors
    #[error("executor already started")]
    AlreadyStarted,

    #[error("no tokio runtime to run the executor on")]
    NoRuntime,

    #[error("executor already finished; {0} rejected")]
    Finished(&'static str),

    #[error("output key '{key}' is already claimed by pending node {owner}")]
    DuplicateOutput { key: String, owner: NodeId },

    // Replay errors
    #[error("replay error: {0}")]
    Replay(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),
}

impl FlowError {
    /// Shorthand for a processing failure, the error node functions return.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    /// The error a processing function originally returned, if this failure
    /// wraps one.
    pub fn root_cause(&self) -> &FlowError {
        match self {
            Self::NodeFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
