//! Edge model and routing
//!
//! Edges are static after build and come in three kinds:
//!
//! - **Direct**: one source to one target, optionally guarded by a
//!   predicate on the envelope.
//! - **FanOut**: one source to an ordered candidate list; a pure
//!   partition function selects the subset that receives each message.
//! - **FanIn**: a source set converging on one target; deliveries are
//!   buffered per source and released as one composite message, ordered
//!   by source registration, once every source has delivered.
//!
//! The [`EdgeRouter`] evaluates predicates and partition functions exactly
//! once per delivered envelope and owns all fan-in state, which is fully
//! checkpointable.

use crate::message::{Envelope, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use weft_checkpoint::{EdgeDescriptor, MessageRecord};

use crate::error::{Result, WorkflowError};

/// Guard on a direct edge; the message crosses iff the predicate holds
pub type EdgePredicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Fan-out partition: maps (message, ordered candidates) to the selected
/// target ids. Must be pure: the runtime relies on identical outputs for
/// identical inputs when replaying.
pub type PartitionFn = Arc<dyn Fn(&Envelope, &[String]) -> Vec<String> + Send + Sync>;

/// Edge variant with its routing behavior
#[derive(Clone)]
pub enum EdgeKind {
    Direct {
        source: String,
        target: String,
        predicate: Option<EdgePredicate>,
    },
    FanOut {
        source: String,
        targets: Vec<String>,
        partition: PartitionFn,
    },
    FanIn {
        sources: Vec<String>,
        target: String,
    },
}

/// A static routing rule between executors
#[derive(Clone)]
pub struct Edge {
    id: String,
    kind: EdgeKind,
}

impl Edge {
    /// Unguarded direct edge
    pub fn direct(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::from_kind(EdgeKind::Direct {
            source: source.into(),
            target: target.into(),
            predicate: None,
        })
    }

    /// Direct edge guarded by a predicate
    pub fn direct_when(
        source: impl Into<String>,
        target: impl Into<String>,
        predicate: EdgePredicate,
    ) -> Self {
        Self::from_kind(EdgeKind::Direct {
            source: source.into(),
            target: target.into(),
            predicate: Some(predicate),
        })
    }

    /// Fan-out edge with a partition function over ordered candidates
    pub fn fan_out(
        source: impl Into<String>,
        targets: Vec<String>,
        partition: PartitionFn,
    ) -> Self {
        Self::from_kind(EdgeKind::FanOut {
            source: source.into(),
            targets,
            partition,
        })
    }

    /// Fan-in edge collecting one message per source
    pub fn fan_in(sources: Vec<String>, target: impl Into<String>) -> Self {
        Self::from_kind(EdgeKind::FanIn {
            sources,
            target: target.into(),
        })
    }

    fn from_kind(kind: EdgeKind) -> Self {
        let id = Self::descriptor_of(&kind).edge_id();
        Self { id, kind }
    }

    /// Stable id, unique per (source, kind, connection)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    /// Executor ids this edge routes from
    pub fn sources(&self) -> Vec<&str> {
        match &self.kind {
            EdgeKind::Direct { source, .. } | EdgeKind::FanOut { source, .. } => vec![source],
            EdgeKind::FanIn { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }

    /// Executor ids this edge can deliver to
    pub fn targets(&self) -> Vec<&str> {
        match &self.kind {
            EdgeKind::Direct { target, .. } | EdgeKind::FanIn { target, .. } => vec![target],
            EdgeKind::FanOut { targets, .. } => targets.iter().map(String::as_str).collect(),
        }
    }

    /// Structural descriptor for fingerprinting
    pub fn descriptor(&self) -> EdgeDescriptor {
        Self::descriptor_of(&self.kind)
    }

    fn descriptor_of(kind: &EdgeKind) -> EdgeDescriptor {
        match kind {
            EdgeKind::Direct {
                source,
                target,
                predicate,
            } => EdgeDescriptor::Direct {
                source: source.clone(),
                target: target.clone(),
                predicated: predicate.is_some(),
            },
            EdgeKind::FanOut { source, targets, .. } => EdgeDescriptor::FanOut {
                source: source.clone(),
                targets: targets.clone(),
            },
            EdgeKind::FanIn { sources, target } => EdgeDescriptor::FanIn {
                sources: sources.clone(),
                target: target.clone(),
            },
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge").field("id", &self.id).finish()
    }
}

/// Serialized fan-in buffer: source id → queued message records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FanInStateRecord {
    pending: BTreeMap<String, Vec<MessageRecord>>,
}

/// Runtime state of one fan-in edge
///
/// One FIFO per source. A source that fires again before the others have
/// fired once is buffered; the extra message counts toward the *next*
/// composite only after the source set has been refilled.
#[derive(Debug)]
pub struct FanInState {
    sources: Vec<String>,
    pending: HashMap<String, VecDeque<Envelope>>,
}

impl FanInState {
    pub fn new(sources: Vec<String>) -> Self {
        let pending = sources
            .iter()
            .map(|s| (s.clone(), VecDeque::new()))
            .collect();
        Self { sources, pending }
    }

    /// Record a delivery; returns the composite members (in source
    /// registration order) when every source has delivered
    pub fn on_delivery(&mut self, source: &str, envelope: Envelope) -> Option<Vec<Envelope>> {
        self.pending.get_mut(source)?.push_back(envelope);

        if self.sources.iter().any(|s| self.pending[s].is_empty()) {
            return None;
        }

        let members = self
            .sources
            .iter()
            .map(|s| {
                self.pending
                    .get_mut(s)
                    .and_then(VecDeque::pop_front)
                    .expect("fan-in source queue drained concurrently")
            })
            .collect();
        Some(members)
    }

    /// Whether any source has buffered messages
    pub fn has_pending(&self) -> bool {
        self.pending.values().any(|q| !q.is_empty())
    }

    /// Serialized form for checkpointing
    pub fn export(&self) -> Result<Value> {
        let record = FanInStateRecord {
            pending: self
                .pending
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .map(|(s, q)| (s.clone(), q.iter().map(Envelope::to_record).collect()))
                .collect(),
        };
        Ok(serde_json::to_value(record)?)
    }

    /// Replace buffered messages from a checkpoint record
    pub fn import(&mut self, value: Value) -> Result<()> {
        let record: FanInStateRecord = serde_json::from_value(value)?;
        for queue in self.pending.values_mut() {
            queue.clear();
        }
        for (source, messages) in record.pending {
            let Some(queue) = self.pending.get_mut(&source) else {
                return Err(WorkflowError::CheckpointIncompatible(format!(
                    "fan-in state names unknown source '{source}'"
                )));
            };
            *queue = messages.into_iter().map(Envelope::from_record).collect();
        }
        Ok(())
    }
}

/// One delivery produced by routing: (recipient, envelope)
pub type Delivery = (String, Envelope);

/// Routes emissions through the static edge set
///
/// Owned by the run. Fan-in state lives behind a lock because routing
/// happens from within concurrent delivery tasks; all other edges are
/// stateless.
pub struct EdgeRouter {
    edges: Vec<Arc<Edge>>,
    by_source: HashMap<String, Vec<usize>>,
    fan_in: Mutex<HashMap<String, FanInState>>,
}

impl EdgeRouter {
    pub fn new(edges: Vec<Edge>) -> Self {
        let edges: Vec<Arc<Edge>> = edges.into_iter().map(Arc::new).collect();

        let mut by_source: HashMap<String, Vec<usize>> = HashMap::new();
        let mut fan_in = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            for source in edge.sources() {
                by_source.entry(source.to_string()).or_default().push(idx);
            }
            if let EdgeKind::FanIn { sources, .. } = edge.kind() {
                fan_in.insert(edge.id().to_string(), FanInState::new(sources.clone()));
            }
        }

        Self {
            edges,
            by_source,
            fan_in: Mutex::new(fan_in),
        }
    }

    /// Route one emission from `source`, returning the deliveries it
    /// produces for the next superstep
    ///
    /// Predicates and partition functions are evaluated exactly once per
    /// call. An empty result means the message was dropped (failed
    /// predicate, empty partition, or a source with no edges).
    pub fn route(&self, source: &str, envelope: &Envelope) -> Vec<Delivery> {
        let Some(edge_indices) = self.by_source.get(source) else {
            tracing::debug!(source, type_id = %envelope.declared_type, "no outgoing edges; message dropped");
            return Vec::new();
        };

        let mut deliveries = Vec::new();
        for &idx in edge_indices {
            let edge = &self.edges[idx];
            match edge.kind() {
                EdgeKind::Direct {
                    target, predicate, ..
                } => {
                    if predicate.as_ref().map_or(true, |p| p(envelope)) {
                        deliveries.push((target.clone(), envelope.clone()));
                    } else {
                        tracing::debug!(edge = edge.id(), "predicate rejected message");
                    }
                }
                EdgeKind::FanOut {
                    targets, partition, ..
                } => {
                    for selected in partition(envelope, targets) {
                        if targets.contains(&selected) {
                            deliveries.push((selected, envelope.clone()));
                        } else {
                            tracing::warn!(
                                edge = edge.id(),
                                target = %selected,
                                "partition selected a non-candidate target; ignored"
                            );
                        }
                    }
                }
                EdgeKind::FanIn { target, .. } => {
                    let mut states = self.fan_in.lock().expect("fan-in lock poisoned");
                    let state = states
                        .get_mut(edge.id())
                        .expect("fan-in edge without state");
                    if let Some(members) = state.on_delivery(source, envelope.clone()) {
                        deliveries.push((target.clone(), composite_envelope(members)));
                    }
                }
            }
        }
        deliveries
    }

    /// Per-edge state for checkpointing (stateless edges absent)
    pub fn export_state(&self) -> Result<BTreeMap<String, Value>> {
        let states = self.fan_in.lock().expect("fan-in lock poisoned");
        let mut exported = BTreeMap::new();
        for (edge_id, state) in states.iter() {
            if state.has_pending() {
                exported.insert(edge_id.clone(), state.export()?);
            }
        }
        Ok(exported)
    }

    /// Restore per-edge state from a checkpoint
    ///
    /// Unknown edge ids are rejected; the fingerprint check upstream makes
    /// that unreachable for compatible workflows.
    pub fn import_state(&self, record: BTreeMap<String, Value>) -> Result<()> {
        let mut states = self.fan_in.lock().expect("fan-in lock poisoned");
        for state in states.values_mut() {
            let sources = state.sources.clone();
            *state = FanInState::new(sources);
        }
        for (edge_id, value) in record {
            let Some(state) = states.get_mut(&edge_id) else {
                return Err(WorkflowError::CheckpointIncompatible(format!(
                    "edge state names unknown edge '{edge_id}'"
                )));
            };
            state.import(value)?;
        }
        Ok(())
    }
}

/// Build the composite released by a fan-in edge: payloads in source
/// registration order, trace inherited from the first member
fn composite_envelope(members: Vec<Envelope>) -> Envelope {
    let trace = members.first().and_then(|e| e.trace.clone());
    let payload = Value::Array(members.into_iter().map(|e| e.payload).collect());
    Envelope {
        payload,
        declared_type: MessageType::composite(),
        trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(payload: Value) -> Envelope {
        Envelope::new(payload, MessageType::named("test"))
    }

    #[test]
    fn test_direct_edge_delivers() {
        let router = EdgeRouter::new(vec![Edge::direct("a", "b")]);
        let deliveries = router.route("a", &envelope(json!(1)));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "b");
    }

    #[test]
    fn test_predicate_gates_direct_edge() {
        let router = EdgeRouter::new(vec![Edge::direct_when(
            "a",
            "b",
            Arc::new(|e| e.payload.as_i64().unwrap_or(0) > 10),
        )]);

        assert!(router.route("a", &envelope(json!(5))).is_empty());
        assert_eq!(router.route("a", &envelope(json!(50))).len(), 1);
    }

    #[test]
    fn test_fan_out_partition_selects_subset() {
        let targets = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let router = EdgeRouter::new(vec![Edge::fan_out(
            "s",
            targets,
            Arc::new(|_msg, candidates| {
                candidates.iter().filter(|c| *c != "y").cloned().collect()
            }),
        )]);

        let recipients: Vec<String> = router
            .route("s", &envelope(json!("m")))
            .into_iter()
            .map(|(r, _)| r)
            .collect();
        assert_eq!(recipients, vec!["x".to_string(), "z".to_string()]);
    }

    #[test]
    fn test_fan_out_empty_partition_drops_message() {
        let router = EdgeRouter::new(vec![Edge::fan_out(
            "s",
            vec!["x".to_string()],
            Arc::new(|_, _| Vec::new()),
        )]);
        assert!(router.route("s", &envelope(json!("m"))).is_empty());
    }

    #[test]
    fn test_fan_in_waits_for_all_sources() {
        let router = EdgeRouter::new(vec![Edge::fan_in(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            "t",
        )]);

        assert!(router.route("a", &envelope(json!("a"))).is_empty());
        assert!(router.route("b", &envelope(json!("b"))).is_empty());

        let deliveries = router.route("c", &envelope(json!("c")));
        assert_eq!(deliveries.len(), 1);
        let (target, composite) = &deliveries[0];
        assert_eq!(target, "t");
        assert_eq!(composite.declared_type, MessageType::composite());
        assert_eq!(composite.payload, json!(["a", "b", "c"]));
    }

    #[test]
    fn test_fan_in_composite_order_is_registration_order() {
        let router = EdgeRouter::new(vec![Edge::fan_in(
            vec!["a".to_string(), "b".to_string()],
            "t",
        )]);

        // Deliver in reverse registration order.
        assert!(router.route("b", &envelope(json!("b"))).is_empty());
        let deliveries = router.route("a", &envelope(json!("a")));
        assert_eq!(deliveries[0].1.payload, json!(["a", "b"]));
    }

    #[test]
    fn test_fan_in_double_fire_buffers_for_next_composite() {
        let router = EdgeRouter::new(vec![Edge::fan_in(
            vec!["a".to_string(), "b".to_string()],
            "t",
        )]);

        assert!(router.route("a", &envelope(json!("a1"))).is_empty());
        // Second firing from the same source before b fires once.
        assert!(router.route("a", &envelope(json!("a2"))).is_empty());

        let first = router.route("b", &envelope(json!("b1")));
        assert_eq!(first[0].1.payload, json!(["a1", "b1"]));

        // The buffered a2 completes the next composite with b2.
        let second = router.route("b", &envelope(json!("b2")));
        assert_eq!(second[0].1.payload, json!(["a2", "b2"]));
    }

    #[test]
    fn test_fan_in_state_round_trip() {
        let edges = || {
            vec![Edge::fan_in(
                vec!["a".to_string(), "b".to_string()],
                "t",
            )]
        };

        let router = EdgeRouter::new(edges());
        router.route("a", &envelope(json!("a1")));
        let exported = router.export_state().unwrap();
        assert_eq!(exported.len(), 1);

        let restored = EdgeRouter::new(edges());
        restored.import_state(exported).unwrap();

        // The restored buffer completes the composite.
        let deliveries = restored.route("b", &envelope(json!("b1")));
        assert_eq!(deliveries[0].1.payload, json!(["a1", "b1"]));
    }

    #[test]
    fn test_import_rejects_unknown_edge() {
        let router = EdgeRouter::new(vec![Edge::direct("a", "b")]);
        let record = BTreeMap::from([("fan_in:[x]->y".to_string(), json!({"pending": {}}))]);
        assert!(matches!(
            router.import_state(record),
            Err(WorkflowError::CheckpointIncompatible(_))
        ));
    }
}
