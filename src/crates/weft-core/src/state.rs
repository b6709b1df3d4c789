//! Scoped key-value state with staged, step-atomic publication
//!
//! Handlers read and write run state through named scopes. Reads always
//! observe the snapshot published at the last step boundary; writes and
//! resets are staged and applied together when the scheduler publishes at
//! the end of the superstep. Every handler in a step therefore sees the
//! same consistent view, regardless of delivery interleaving.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use weft_checkpoint::ScopeStateRecord;

/// Default scope used by the convenience accessors
pub const DEFAULT_SCOPE: &str = "run";

#[derive(Debug, Clone)]
enum StagedOp {
    Set {
        scope: String,
        key: String,
        value: Value,
    },
    Reset {
        scope: String,
        key: String,
    },
}

/// Per-run scoped state manager
///
/// Owned by the run; handlers reach it through their bound context. The
/// scheduler is the only caller of [`publish`](StateManager::publish).
#[derive(Debug, Default)]
pub struct StateManager {
    published: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    staged: Mutex<Vec<StagedOp>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value from the published snapshot
    pub fn read(&self, scope: &str, key: &str) -> Option<Value> {
        self.published
            .lock()
            .expect("state lock poisoned")
            .get(scope)
            .and_then(|s| s.get(key))
            .cloned()
    }

    /// Stage a write; visible to readers after the next publish
    pub fn queue_update(&self, scope: &str, key: &str, value: Value) {
        self.staged
            .lock()
            .expect("state lock poisoned")
            .push(StagedOp::Set {
                scope: scope.to_string(),
                key: key.to_string(),
                value,
            });
    }

    /// Stage a removal; visible to readers after the next publish
    pub fn queue_reset(&self, scope: &str, key: &str) {
        self.staged
            .lock()
            .expect("state lock poisoned")
            .push(StagedOp::Reset {
                scope: scope.to_string(),
                key: key.to_string(),
            });
    }

    /// Apply every staged operation atomically, in staging order
    ///
    /// Called by the scheduler at the superstep boundary. Returns the
    /// number of operations applied.
    pub fn publish(&self) -> usize {
        let ops: Vec<StagedOp> = {
            let mut staged = self.staged.lock().expect("state lock poisoned");
            std::mem::take(&mut *staged)
        };
        let applied = ops.len();

        let mut published = self.published.lock().expect("state lock poisoned");
        for op in ops {
            match op {
                StagedOp::Set { scope, key, value } => {
                    published.entry(scope).or_default().insert(key, value);
                }
                StagedOp::Reset { scope, key } => {
                    if let Some(entries) = published.get_mut(&scope) {
                        entries.remove(&key);
                        if entries.is_empty() {
                            published.remove(&scope);
                        }
                    }
                }
            }
        }

        applied
    }

    /// Published state as a checkpoint record
    ///
    /// Staged operations are not captured; checkpoints are written after
    /// publication, so at snapshot time the staging buffer is empty.
    pub fn export(&self) -> ScopeStateRecord {
        self.published.lock().expect("state lock poisoned").clone()
    }

    /// Replace all published state with a checkpoint record
    pub fn import(&self, record: ScopeStateRecord) {
        self.staged.lock().expect("state lock poisoned").clear();
        *self.published.lock().expect("state lock poisoned") = record;
    }
}
