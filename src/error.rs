use crate::task::TaskId;
use thiserror::Error;

/// Result type for stage pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while wiring or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The connection is draining; the caller should finish its loop
    #[error("Connection is shutting down")]
    Shutdown,

    /// Declared stage capability does not match the supplied connections
    #[error("Stage '{stage}' cannot be wired: {reason}")]
    Wiring { stage: String, reason: String },

    /// A connection end has already been claimed by another stage
    #[error("Connection {role} end is already bound")]
    AlreadyBound { role: &'static str },

    /// The connection was torn down before the stage could bind to it
    #[error("Connection has already been torn down")]
    ConnectionClosed,

    /// Acknowledgment for a task the connection never handed out
    #[error("Unknown task {0}")]
    UnknownTask(TaskId),

    /// Stage parameters are missing or the downstream resource could not be opened
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Pipeline already started
    #[error("Pipeline has already been started")]
    AlreadyStarted,

    /// No stages in pipeline
    #[error("Cannot start pipeline with no stages")]
    NoStages,

    /// Stage execution error
    #[error("Stage execution failed: {0}")]
    StageError(String),

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Malformed pipeline configuration file
    #[error("Configuration file error: {0}")]
    Config(String),
}

impl PipelineError {
    /// True for the expected teardown signal
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PipelineError::Shutdown)
    }
}

/// Fatal errors raised while applying stage parameters.
///
/// These require operator correction and are never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value for parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("Failed to open downstream resource: {0}")]
    Resource(String),
}
