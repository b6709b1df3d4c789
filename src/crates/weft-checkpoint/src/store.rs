//! Extensible checkpoint storage trait
//!
//! [`CheckpointStore`] is the seam between the runtime and persistence.
//! The runtime calls [`commit`](CheckpointStore::commit) after a superstep
//! and [`lookup`](CheckpointStore::lookup) during restore; everything else
//! (databases, retention, compression) is the backend's business.
//!
//! Implementations must be `Send + Sync` and safe for concurrent runs:
//! checkpoints are namespaced by run id, and ids within a run are ordered
//! by commit time.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use weft_checkpoint::{CheckpointStore, CheckpointId, RunCheckpoint, Result};
//! use async_trait::async_trait;
//!
//! struct PostgresStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointStore for PostgresStore {
//!     async fn commit(&self, run_id: &str, checkpoint: RunCheckpoint) -> Result<CheckpointId> {
//!         let id = weft_checkpoint::new_checkpoint_id();
//!         let body = serde_json::to_value(&checkpoint)?;
//!         sqlx::query("INSERT INTO checkpoints (run_id, id, step, body) VALUES ($1, $2, $3, $4)")
//!             .bind(run_id).bind(&id).bind(checkpoint.step_number as i64).bind(body)
//!             .execute(&self.pool).await
//!             .map_err(|e| weft_checkpoint::CheckpointError::Storage(e.to_string()))?;
//!         Ok(id)
//!     }
//!
//!     async fn lookup(&self, run_id: &str, id: &CheckpointId) -> Result<Option<RunCheckpoint>> {
//!         // SELECT body FROM checkpoints WHERE run_id = $1 AND id = $2
//!         # unimplemented!()
//!     }
//!
//!     async fn list(&self, run_id: &str) -> Result<Vec<weft_checkpoint::CheckpointSummary>> {
//!         // SELECT id, step, ts FROM checkpoints WHERE run_id = $1 ORDER BY ts
//!         # unimplemented!()
//!     }
//! }
//! ```

use crate::checkpoint::{CheckpointId, CheckpointSummary, RunCheckpoint};
use crate::error::Result;
use async_trait::async_trait;

/// Storage backend for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint for the given run and return its stable id
    ///
    /// Ids are opaque; ordering within a run follows commit order.
    async fn commit(&self, run_id: &str, checkpoint: RunCheckpoint) -> Result<CheckpointId>;

    /// Fetch a checkpoint by id, or `None` if it was never committed
    async fn lookup(&self, run_id: &str, id: &CheckpointId) -> Result<Option<RunCheckpoint>>;

    /// Summaries of every checkpoint committed for a run, oldest first
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointSummary>>;

    /// The most recently committed checkpoint for a run, if any
    async fn latest(&self, run_id: &str) -> Result<Option<(CheckpointId, RunCheckpoint)>> {
        let Some(summary) = self.list(run_id).await?.into_iter().last() else {
            return Ok(None);
        };
        let checkpoint = self.lookup(run_id, &summary.checkpoint_id).await?;
        Ok(checkpoint.map(|c| (summary.checkpoint_id, c)))
    }
}
