//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] is the reference [`CheckpointStore`]: a
//! thread-safe map of run id → committed entries, suitable for tests and
//! single-process hosts. Data does not survive a restart.
//!
//! Entries are held codec-encoded, so the store exercises the same
//! [`ValueCodec`] bijectivity contract a real backend relies on.

use crate::checkpoint::{new_checkpoint_id, CheckpointId, CheckpointSummary, RunCheckpoint};
use crate::codec::{JsonCodec, ValueCodec};
use crate::error::Result;
use crate::store::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct StoredEntry {
    checkpoint_id: CheckpointId,
    step_number: u64,
    ts: chrono::DateTime<chrono::Utc>,
    body: Vec<u8>,
}

/// Thread-safe in-memory checkpoint store
///
/// ```rust
/// # use weft_checkpoint::{InMemoryCheckpointStore, CheckpointStore, RunCheckpoint, WorkflowFingerprint};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> weft_checkpoint::Result<()> {
/// let store = InMemoryCheckpointStore::new();
/// let id = store
///     .commit("run-1", RunCheckpoint::new(1, WorkflowFingerprint::default()))
///     .await?;
/// assert!(store.lookup("run-1", &id).await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct InMemoryCheckpointStore<C: ValueCodec = JsonCodec> {
    entries: Arc<RwLock<HashMap<String, Vec<StoredEntry>>>>,
    codec: C,
}

impl InMemoryCheckpointStore<JsonCodec> {
    /// Create a store with the default JSON codec
    pub fn new() -> Self {
        Self::with_codec(JsonCodec::new())
    }
}

impl Default for InMemoryCheckpointStore<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ValueCodec> InMemoryCheckpointStore<C> {
    /// Create a store backed by a custom codec
    pub fn with_codec(codec: C) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            codec,
        }
    }

    /// Drop every stored checkpoint (test isolation)
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("checkpoint store lock poisoned")
            .clear();
    }

    /// Number of checkpoints stored for a run
    pub fn count(&self, run_id: &str) -> usize {
        self.entries
            .read()
            .expect("checkpoint store lock poisoned")
            .get(run_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl<C: ValueCodec> CheckpointStore for InMemoryCheckpointStore<C> {
    async fn commit(&self, run_id: &str, checkpoint: RunCheckpoint) -> Result<CheckpointId> {
        let checkpoint_id = new_checkpoint_id();
        let body = self.codec.encode(&checkpoint)?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| crate::CheckpointError::Storage("store lock poisoned".to_string()))?;
        entries
            .entry(run_id.to_string())
            .or_default()
            .push(StoredEntry {
                checkpoint_id: checkpoint_id.clone(),
                step_number: checkpoint.step_number,
                ts: checkpoint.ts,
                body,
            });

        Ok(checkpoint_id)
    }

    async fn lookup(&self, run_id: &str, id: &CheckpointId) -> Result<Option<RunCheckpoint>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| crate::CheckpointError::Storage("store lock poisoned".to_string()))?;

        let Some(entry) = entries
            .get(run_id)
            .and_then(|run| run.iter().find(|e| &e.checkpoint_id == id))
        else {
            return Ok(None);
        };

        Ok(Some(self.codec.decode(&entry.body)?))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointSummary>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| crate::CheckpointError::Storage("store lock poisoned".to_string()))?;

        Ok(entries
            .get(run_id)
            .map(|run| {
                run.iter()
                    .map(|e| CheckpointSummary {
                        checkpoint_id: e.checkpoint_id.clone(),
                        step_number: e.step_number,
                        ts: e.ts,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::WorkflowFingerprint;
    use crate::codec::BincodeCodec;

    fn checkpoint(step: u64) -> RunCheckpoint {
        RunCheckpoint::new(step, WorkflowFingerprint::default())
    }

    #[tokio::test]
    async fn test_commit_and_lookup() {
        let store = InMemoryCheckpointStore::new();
        let id = store.commit("run-1", checkpoint(1)).await.unwrap();

        let restored = store.lookup("run-1", &id).await.unwrap().unwrap();
        assert_eq!(restored.step_number, 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_returns_none() {
        let store = InMemoryCheckpointStore::new();
        let found = store
            .lookup("run-1", &"no-such-id".to_string())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let store = InMemoryCheckpointStore::new();
        let id = store.commit("run-1", checkpoint(1)).await.unwrap();

        assert!(store.lookup("run-2", &id).await.unwrap().is_none());
        assert_eq!(store.count("run-1"), 1);
        assert_eq!(store.count("run-2"), 0);
    }

    #[tokio::test]
    async fn test_list_preserves_commit_order() {
        let store = InMemoryCheckpointStore::new();
        for step in 1..=3 {
            store.commit("run-1", checkpoint(step)).await.unwrap();
        }

        let steps: Vec<u64> = store
            .list("run-1")
            .await
            .unwrap()
            .iter()
            .map(|s| s.step_number)
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_latest_returns_last_commit() {
        let store = InMemoryCheckpointStore::new();
        store.commit("run-1", checkpoint(1)).await.unwrap();
        store.commit("run-1", checkpoint(2)).await.unwrap();

        let (_, latest) = store.latest("run-1").await.unwrap().unwrap();
        assert_eq!(latest.step_number, 2);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = InMemoryCheckpointStore::new();
        let id = store.commit("run-1", checkpoint(1)).await.unwrap();

        store.clear();
        assert!(store.lookup("run-1", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bincode_backed_store() {
        let store = InMemoryCheckpointStore::with_codec(BincodeCodec::new());
        let id = store.commit("run-1", checkpoint(4)).await.unwrap();

        let restored = store.lookup("run-1", &id).await.unwrap().unwrap();
        assert_eq!(restored.step_number, 4);
    }
}
