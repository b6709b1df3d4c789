//! Core checkpoint data structures
//!
//! A [`RunCheckpoint`] is the immutable snapshot of one run at a superstep
//! boundary: the step counter, a structural [`WorkflowFingerprint`] of the
//! graph that produced it, the runner's queued work, scoped state, and
//! per-edge state. All types here are plain serde data; the runtime owns
//! the conversion from its live structures into these records.
//!
//! Fingerprint comparison is structural equality: a checkpoint may only be
//! restored into a workflow whose executors, edges, input ports, and start
//! executor all match the recorded shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Scope state record: scope name → key → value
pub type ScopeStateRecord = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Trace context carried by a serialized envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Stable id correlating every hop of one logical message flow
    pub trace_id: String,
}

/// Serialized message envelope
///
/// The declared type id is stored alongside the payload so routing
/// decisions survive round-trips through the store: a payload that
/// deserializes to a polymorphic container is still routed by the type it
/// was sent as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message payload as an opaque JSON value
    pub payload: serde_json::Value,
    /// Declared type id of the payload
    pub type_id: String,
    /// Optional trace context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceRecord>,
}

/// Serialized external request awaiting a host response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Unique id of this request
    pub request_id: String,
    /// Port the request left through
    pub port_id: String,
    /// Request payload
    pub payload: serde_json::Value,
    /// Declared type of the request payload
    pub request_type: String,
    /// Declared type a response must carry
    pub response_type: String,
}

/// Serialized external response not yet routed into the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Request this response answers, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Port the response is addressed to
    pub port_id: String,
    /// Response payload
    pub data: serde_json::Value,
    /// Declared type of the response payload
    pub response_type: String,
}

/// Structural description of one edge, stable across process restarts
///
/// Predicates and partition functions are code and cannot be serialized;
/// the descriptor records only their presence so that adding or removing
/// one changes the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeDescriptor {
    /// One source to one target, optionally guarded
    Direct {
        source: String,
        target: String,
        predicated: bool,
    },
    /// One source to an ordered candidate list with a partition function
    FanOut {
        source: String,
        targets: Vec<String>,
    },
    /// A source set converging on one target
    FanIn {
        sources: Vec<String>,
        target: String,
    },
}

impl EdgeDescriptor {
    /// Canonical id for this edge, unique per (source, kind, connection)
    pub fn edge_id(&self) -> String {
        match self {
            Self::Direct { source, target, predicated } => {
                if *predicated {
                    format!("direct?:{source}->{target}")
                } else {
                    format!("direct:{source}->{target}")
                }
            }
            Self::FanOut { source, targets } => {
                format!("fan_out:{source}->[{}]", targets.join(","))
            }
            Self::FanIn { sources, target } => {
                format!("fan_in:[{}]->{target}", sources.join(","))
            }
        }
    }
}

/// Input port descriptor: (port id, request type, response type)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub port_id: String,
    pub request_type: String,
    pub response_type: String,
}

/// Structural identity of a workflow
///
/// Two workflows match iff all four fields are equal. Collections are
/// ordered so equality (and the serialized form) is independent of
/// registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowFingerprint {
    /// Set of (executor type id, executor id) pairs
    pub executors: BTreeSet<(String, String)>,
    /// Source executor id → descriptors of its outgoing edges
    pub edges: BTreeMap<String, Vec<EdgeDescriptor>>,
    /// Declared request/response ports
    pub input_ports: BTreeSet<PortDescriptor>,
    /// Designated start executor
    pub start_executor_id: String,
}

impl WorkflowFingerprint {
    /// Structural match against another fingerprint
    pub fn matches(&self, other: &WorkflowFingerprint) -> bool {
        self == other
    }

    /// Describe the first structural difference, for error messages
    pub fn diff(&self, other: &WorkflowFingerprint) -> Option<String> {
        if self.start_executor_id != other.start_executor_id {
            return Some(format!(
                "start executor differs: '{}' vs '{}'",
                self.start_executor_id, other.start_executor_id
            ));
        }
        if self.executors != other.executors {
            return Some("executor set differs".to_string());
        }
        if self.edges != other.edges {
            return Some("edge topology differs".to_string());
        }
        if self.input_ports != other.input_ports {
            return Some("input port set differs".to_string());
        }
        None
    }
}

/// Queued work and pending external traffic at the snapshot boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunnerStateRecord {
    /// Messages queued for the next superstep, per recipient, FIFO order
    pub next_step_inbox: BTreeMap<String, Vec<MessageRecord>>,
    /// External requests that have left the workflow and not been answered
    pub outstanding_requests: Vec<RequestRecord>,
    /// External responses accepted but not yet routed into the graph
    pub queued_responses: Vec<ResponseRecord>,
    /// Opaque per-executor snapshots (stateful executors, embedded
    /// sub-workflow checkpoints)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub executor_state: BTreeMap<String, serde_json::Value>,
}

/// Immutable snapshot of a run at a superstep boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Checkpoint format version (currently 1)
    pub v: i32,

    /// Superstep after which this snapshot was taken
    pub step_number: u64,

    /// Structural identity of the producing workflow
    pub fingerprint: WorkflowFingerprint,

    /// Queued messages, pending requests/responses, executor snapshots
    pub runner_state: RunnerStateRecord,

    /// Scoped key-value state, published values only
    pub scope_state: ScopeStateRecord,

    /// Per-edge opaque state (fan-in buffers; stateless edges absent)
    pub edge_state: BTreeMap<String, serde_json::Value>,

    /// Snapshot timestamp
    pub ts: DateTime<Utc>,
}

impl RunCheckpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    /// Create a checkpoint for the given step and workflow shape
    pub fn new(step_number: u64, fingerprint: WorkflowFingerprint) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            step_number,
            fingerprint,
            runner_state: RunnerStateRecord::default(),
            scope_state: ScopeStateRecord::default(),
            edge_state: BTreeMap::new(),
            ts: Utc::now(),
        }
    }

    /// Set the runner state
    pub fn with_runner_state(mut self, runner_state: RunnerStateRecord) -> Self {
        self.runner_state = runner_state;
        self
    }

    /// Set the scope state
    pub fn with_scope_state(mut self, scope_state: ScopeStateRecord) -> Self {
        self.scope_state = scope_state;
        self
    }

    /// Set the edge state
    pub fn with_edge_state(mut self, edge_state: BTreeMap<String, serde_json::Value>) -> Self {
        self.edge_state = edge_state;
        self
    }
}

/// Identity and ordering info for one committed checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Stable checkpoint id
    pub checkpoint_id: CheckpointId,
    /// Superstep the checkpoint closed
    pub step_number: u64,
    /// Commit timestamp
    pub ts: DateTime<Utc>,
}

/// Generate a fresh checkpoint id
pub fn new_checkpoint_id() -> CheckpointId {
    Uuid::new_v4().to_string()
}
