//! # weft-checkpoint - Checkpoint model and storage for weft workflows
//!
//! This crate carries everything a weft run needs to suspend and resume:
//! the serialized checkpoint schema, the [`CheckpointStore`] trait that
//! hosts implement against their storage of choice, an in-memory
//! reference store, and the pluggable [`ValueCodec`] used to materialize
//! opaque payloads.
//!
//! A checkpoint is a snapshot of one run at a superstep boundary:
//!
//! ```text
//! RunCheckpoint
//! ├── step_number        superstep the snapshot closed
//! ├── fingerprint        structural identity of the workflow
//! │     ├── executors    set of (type id, executor id)
//! │     ├── edges        source → edge descriptors
//! │     ├── input_ports  declared request/response ports
//! │     └── start_executor_id
//! ├── runner_state       queued messages, pending requests/responses,
//! │                      per-executor snapshots
//! ├── scope_state        (scope, key) → value
//! └── edge_state         edge id → opaque state (fan-in buffers)
//! ```
//!
//! Restoring is gated on the fingerprint: a checkpoint is only accepted
//! by a workflow whose structure matches the one that produced it.
//!
//! The runtime lives in `weft-core`; this crate is deliberately free of
//! execution concerns so storage backends can depend on it alone.

pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod memory;
pub mod store;

pub use checkpoint::{
    new_checkpoint_id, CheckpointId, CheckpointSummary, EdgeDescriptor, MessageRecord,
    PortDescriptor, RequestRecord, ResponseRecord, RunCheckpoint, RunnerStateRecord,
    ScopeStateRecord, TraceRecord, WorkflowFingerprint,
};
pub use codec::{BincodeCodec, JsonCodec, ValueCodec};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use store::CheckpointStore;
