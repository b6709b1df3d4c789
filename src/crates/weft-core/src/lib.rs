//! # weft-core - Deterministic superstep workflow runtime
//!
//! A checkpointable, graph-based dataflow engine: typed messages are
//! routed between user-defined executors by a bounded-concurrency
//! superstep scheduler, with fan-out/fan-in edges, external
//! request/response ports, and the ability to suspend, snapshot, and
//! resume mid-computation.
//!
//! ## Execution model
//!
//! Execution proceeds in **supersteps**. Every message enqueued during
//! step N is delivered in step N+1, never sooner, which makes runs
//! deterministic under concurrency:
//!
//! ```text
//! superstep N
//! ┌───────────────────────────────────────────────┐
//! │ deliver step-N inbox                          │
//! │   ├─ recipient A ──┐  concurrent across       │
//! │   ├─ recipient B ──┤  recipients, FIFO        │
//! │   └─ recipient C ──┘  within each             │
//! │        │ emissions → step N+1 inbox           │
//! │ drive joined sub-workflows (one child step)   │
//! │ publish staged scope state (atomic)           │
//! │ commit checkpoint (optional)                  │
//! │ emit SuperStepCompleted                       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use weft_core::{FnExecutor, RunOptions, WatchOptions, WorkflowBuilder};
//! use serde_json::json;
//!
//! let workflow = WorkflowBuilder::new()
//!     .add_executor(
//!         FnExecutor::builder("greet")
//!             .handle_any(|envelope, ctx| async move {
//!                 let name = envelope.payload.as_str().unwrap_or("world");
//!                 ctx.send_message(json!(format!("hello, {name}")), None).await
//!             })
//!             .build_arc(),
//!     )
//!     .set_start("greet")
//!     .declare_output("greet")
//!     .build()?;
//!
//! let handle = workflow.start(RunOptions::new());
//! handle.enqueue(json!("weft")).await?;
//!
//! let mut events = handle.watch_event_stream(WatchOptions::default())?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), weft_core::WorkflowError>(())
//! ```
//!
//! ## Module map
//!
//! - [`builder`] - workflow construction DSL and validation
//! - [`executor`] - the [`Executor`] contract and closure-table executors
//! - [`edge`] - direct / fan-out / fan-in edges and routing
//! - [`context`] - the handler effect surface
//! - [`state`] - scoped state with step-atomic publication
//! - [`ports`] - external request/response boundaries
//! - [`runner`] - the superstep scheduler
//! - [`events`] - the host-visible event stream
//! - [`handle`] - the host-facing run handle and execution modes
//! - [`subworkflow`] - child workflows embedded as executors
//!
//! Checkpoint persistence lives in the `weft-checkpoint` crate and plugs
//! in through [`RunOptions::with_checkpoint_store`].

pub mod builder;
pub mod context;
pub mod edge;
pub mod error;
pub mod events;
pub mod executor;
pub mod handle;
pub mod message;
pub mod ports;
pub mod runner;
pub mod state;
pub mod step;
pub mod subworkflow;

mod shared;

// Re-export main types
pub use builder::{Workflow, WorkflowBuilder};
pub use context::WorkflowContext;
pub use edge::{Edge, EdgeKind, EdgePredicate, EdgeRouter, FanInState, PartitionFn};
pub use error::{Result, WorkflowError};
pub use events::{HaltReason, RunStatus, WatchOptions, WorkflowEvent};
pub use executor::{Executor, ExecutorBuilder, FnExecutor, JoinedActivity};
pub use handle::{RunHandle, RunMode, RunOptions};
pub use message::{Envelope, MessageType, TraceContext};
pub use ports::{ExternalRequest, ExternalResponse, RequestInputExecutor, RequestPort};
pub use state::{StateManager, DEFAULT_SCOPE};
pub use subworkflow::WorkflowExecutor;

// Checkpoint surface re-exported for hosts
pub use weft_checkpoint::{
    CheckpointId, CheckpointStore, InMemoryCheckpointStore, RunCheckpoint, WorkflowFingerprint,
};
