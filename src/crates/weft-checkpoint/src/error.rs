//! Checkpoint failure surface
//!
//! Three things can go wrong with a checkpoint: the restore gate rejects
//! it ([`Incompatible`](CheckpointError::Incompatible), the structural
//! fingerprint check that keeps a snapshot from being imported into a
//! workflow other than the one that produced it), the store cannot
//! produce it ([`NotFound`](CheckpointError::NotFound),
//! [`Storage`](CheckpointError::Storage)), or a record fails to
//! materialize through the value codec. Incompatibility and lookup misses
//! are deliberate outcomes a host is expected to branch on; the rest are
//! faults.

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Ways a checkpoint operation can fail
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The checkpoint's workflow fingerprint does not match the workflow
    /// it is being restored into
    ///
    /// This is the restore gate doing its job: executors, edge topology,
    /// input ports, and the start executor must all match structurally.
    /// The run keeps the state it had before the restore attempt.
    #[error("Checkpoint rejected, fingerprint mismatch: {0}")]
    Incompatible(String),

    /// No checkpoint with this id was ever committed for the run
    #[error("No checkpoint '{0}' committed for this run")]
    NotFound(String),

    /// The storage backend failed to commit or fetch
    #[error("Checkpoint store failure: {0}")]
    Storage(String),

    /// A record could not be materialized as (or rebuilt from) JSON text
    #[error("Checkpoint record not materializable: {0}")]
    Record(#[from] serde_json::Error),

    /// A record's binary frame could not be written or read
    #[error("Checkpoint frame not materializable: {0}")]
    Frame(#[from] bincode::Error),
}
