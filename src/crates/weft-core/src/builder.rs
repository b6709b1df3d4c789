//! Workflow construction
//!
//! [`WorkflowBuilder`] is the construction DSL: add executors, connect
//! edges, declare input ports, designate the start and output executors,
//! then [`build`](WorkflowBuilder::build). Building validates the graph
//! structure once; the resulting [`Workflow`] is immutable and can back
//! any number of runs.

use crate::edge::{Edge, EdgePredicate, PartitionFn};
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::ports::{RequestInputExecutor, RequestPort};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use weft_checkpoint::WorkflowFingerprint;

/// An immutable, validated workflow graph
pub struct Workflow {
    executors: HashMap<String, Arc<dyn Executor>>,
    edges: Vec<Edge>,
    ports: Vec<RequestPort>,
    start: String,
    outputs: HashSet<String>,
}

impl Workflow {
    /// Look up an executor by id
    pub fn executor(&self, id: &str) -> Option<&Arc<dyn Executor>> {
        self.executors.get(id)
    }

    /// All executors, in arbitrary order
    pub fn executors(&self) -> impl Iterator<Item = &Arc<dyn Executor>> {
        self.executors.values()
    }

    /// The static edge set
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Look up a declared port by id
    pub fn port(&self, port_id: &str) -> Option<&RequestPort> {
        self.ports.iter().find(|p| p.port_id == port_id)
    }

    /// All declared ports
    pub fn ports(&self) -> &[RequestPort] {
        &self.ports
    }

    /// The designated start executor
    pub fn start_executor_id(&self) -> &str {
        &self.start
    }

    /// Whether an executor's emissions surface as workflow outputs
    pub fn is_output(&self, id: &str) -> bool {
        self.outputs.contains(id)
    }

    /// Structural identity used to gate checkpoint restores
    pub fn fingerprint(&self) -> WorkflowFingerprint {
        let executors: BTreeSet<(String, String)> = self
            .executors
            .values()
            .map(|e| (e.type_id().to_string(), e.id().to_string()))
            .collect();

        let mut edges: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for edge in &self.edges {
            let source = edge.sources()[0].to_string();
            edges.entry(source).or_default().push(edge.descriptor());
        }
        for descriptors in edges.values_mut() {
            descriptors.sort();
        }

        let input_ports = self.ports.iter().map(RequestPort::descriptor).collect();

        WorkflowFingerprint {
            executors,
            edges,
            input_ports,
            start_executor_id: self.start.clone(),
        }
    }
}

/// Construction DSL for [`Workflow`]
#[derive(Default)]
pub struct WorkflowBuilder {
    executors: Vec<Arc<dyn Executor>>,
    edges: Vec<Edge>,
    ports: Vec<RequestPort>,
    start: Option<String>,
    outputs: HashSet<String>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor
    pub fn add_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    /// Connect a direct edge
    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::direct(source, target));
        self
    }

    /// Connect a direct edge guarded by a predicate
    pub fn add_edge_when(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        predicate: EdgePredicate,
    ) -> Self {
        self.edges.push(Edge::direct_when(source, target, predicate));
        self
    }

    /// Connect a fan-out edge over ordered candidates
    pub fn add_fan_out(
        mut self,
        source: impl Into<String>,
        targets: Vec<String>,
        partition: PartitionFn,
    ) -> Self {
        self.edges.push(Edge::fan_out(source, targets, partition));
        self
    }

    /// Connect a fan-in edge collecting one message per source
    pub fn add_fan_in(mut self, sources: Vec<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::fan_in(sources, target));
        self
    }

    /// Declare a request/response port
    ///
    /// Registers the port's [`RequestInputExecutor`] under the port id;
    /// edges connect to it like any other executor.
    pub fn add_input_port(mut self, port: RequestPort) -> Self {
        self.executors
            .push(Arc::new(RequestInputExecutor::new(port.clone())));
        self.ports.push(port);
        self
    }

    /// Designate the start executor; initial input must match its types
    pub fn set_start(mut self, id: impl Into<String>) -> Self {
        self.start = Some(id.into());
        self
    }

    /// Surface an executor's emissions as workflow outputs
    pub fn declare_output(mut self, id: impl Into<String>) -> Self {
        self.outputs.insert(id.into());
        self
    }

    /// Validate the structure and produce an immutable [`Workflow`]
    pub fn build(self) -> Result<Workflow> {
        let mut executors: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        for executor in self.executors {
            let id = executor.id().to_string();
            if executors.insert(id.clone(), executor).is_some() {
                return Err(WorkflowError::Validation(format!(
                    "duplicate executor id '{id}'"
                )));
            }
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id().to_string()) {
                return Err(WorkflowError::Validation(format!(
                    "duplicate edge '{}'",
                    edge.id()
                )));
            }
            for endpoint in edge.sources().into_iter().chain(edge.targets()) {
                if !executors.contains_key(endpoint) {
                    return Err(WorkflowError::Validation(format!(
                        "edge '{}' references unknown executor '{endpoint}'",
                        edge.id()
                    )));
                }
            }
            match edge.kind() {
                crate::edge::EdgeKind::FanOut { targets, .. } if targets.is_empty() => {
                    return Err(WorkflowError::Validation(format!(
                        "fan-out edge '{}' has no candidate targets",
                        edge.id()
                    )));
                }
                crate::edge::EdgeKind::FanIn { sources, .. } => {
                    if sources.is_empty() {
                        return Err(WorkflowError::Validation(format!(
                            "fan-in edge '{}' has no sources",
                            edge.id()
                        )));
                    }
                    let distinct: HashSet<_> = sources.iter().collect();
                    if distinct.len() != sources.len() {
                        return Err(WorkflowError::Validation(format!(
                            "fan-in edge '{}' lists a source twice",
                            edge.id()
                        )));
                    }
                }
                _ => {}
            }
        }

        let Some(start) = self.start else {
            return Err(WorkflowError::Validation(
                "no start executor designated".to_string(),
            ));
        };
        if !executors.contains_key(&start) {
            return Err(WorkflowError::Validation(format!(
                "start executor '{start}' does not exist"
            )));
        }

        for output in &self.outputs {
            if !executors.contains_key(output) {
                return Err(WorkflowError::Validation(format!(
                    "output executor '{output}' does not exist"
                )));
            }
        }

        Ok(Workflow {
            executors,
            edges: self.edges,
            ports: self.ports,
            start,
            outputs: self.outputs,
        })
    }
}
