//! Error types for workflow construction and execution
//!
//! All fallible surfaces of the runtime return [`WorkflowError`] through
//! the crate-wide [`Result`] alias. The variants map one-to-one onto the
//! failure kinds a host can observe: construction problems, input typing
//! problems, watcher contention, checkpoint incompatibility, executor
//! faults, and operations against a finished run.

use thiserror::Error;

/// Convenience result type using [`WorkflowError`]
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Comprehensive error type for all workflow operations
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Workflow structure validation failed during build
    ///
    /// Raised by the builder: unknown edge endpoints, duplicate executor
    /// ids, a missing start executor, and similar structural defects.
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    /// An input's declared type is not accepted by the start executor
    ///
    /// Raised by `enqueue` before the run has started. No state changes.
    #[error("Start executor '{executor}' does not accept input type '{type_id}'")]
    UnsupportedInputType {
        /// The start executor
        executor: String,
        /// Declared type of the rejected input
        type_id: String,
    },

    /// A payload's declared type disagrees with what a port requires
    ///
    /// Raised when an external response does not satisfy the port's
    /// declared response type. No state changes.
    #[error("Type mismatch on port '{port}': expected '{expected}', got '{actual}'")]
    TypeMismatch {
        /// Port that rejected the payload
        port: String,
        /// Declared type the port requires
        expected: String,
        /// Declared type that was offered
        actual: String,
    },

    /// A second event-stream watcher was requested while one is active
    ///
    /// The event stream is single-consumer; drop the first watcher before
    /// opening another.
    #[error("Event stream already has an active watcher")]
    ConcurrentWatch,

    /// Restore was attempted against a structurally different workflow
    ///
    /// The run keeps the state it had before the restore call.
    #[error("Checkpoint incompatible with this workflow: {0}")]
    CheckpointIncompatible(String),

    /// A handler returned an error
    ///
    /// Fatal for the run: the scheduler never retries handler
    /// invocations. An `ExecutorFailed` event is emitted before the event
    /// stream closes.
    #[error("Executor '{executor}' failed: {error}")]
    ExecutorFault {
        /// Executor whose handler failed
        executor: String,
        /// Error reported by the handler
        error: String,
    },

    /// Operation on a run that has halted, failed, or been disposed
    #[error("Run has ended: {0}")]
    RunEnded(String),

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] weft_checkpoint::CheckpointError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General execution error without a more specific variant
    #[error("Execution failed: {0}")]
    Execution(String),
}

impl WorkflowError {
    /// Create an executor fault with context
    pub fn executor_fault(executor: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ExecutorFault {
            executor: executor.into(),
            error: error.into(),
        }
    }

    /// Create a type mismatch error for a port
    pub fn type_mismatch(
        port: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            port: port.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
