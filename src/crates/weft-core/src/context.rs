//! Bound handler context
//!
//! A [`WorkflowContext`] is created per handler invocation and is the only
//! surface through which user code affects the run: sending messages,
//! raising events, staging scope state, and posting external requests.
//! Emissions are routed through the edge set the moment they are sent and
//! land in the *next* superstep's inbox, never the current one.

use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;
use crate::message::{Envelope, MessageType, TraceContext};
use crate::ports::ExternalRequest;
use crate::shared::RunShared;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct ContextInner {
    executor_id: String,
    run: Arc<RunShared>,
    trace: Option<TraceContext>,
    emitted: AtomicUsize,
    is_output: bool,
}

/// Handler effect surface, bound to one executor invocation
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

impl WorkflowContext {
    pub(crate) fn bind(
        run: Arc<RunShared>,
        executor_id: String,
        trace: Option<TraceContext>,
    ) -> Self {
        let is_output = run.workflow.is_output(&executor_id);
        Self {
            inner: Arc::new(ContextInner {
                executor_id,
                run,
                trace,
                emitted: AtomicUsize::new(0),
                is_output,
            }),
        }
    }

    /// Id of the executor this context is bound to
    pub fn executor_id(&self) -> &str {
        &self.inner.executor_id
    }

    /// Id of the enclosing run
    pub fn run_id(&self) -> &str {
        &self.inner.run.run_id
    }

    /// Send a value along this executor's outgoing edges
    ///
    /// The declared type defaults to the payload's JSON kind when not
    /// given. Delivery happens in the next superstep.
    pub async fn send_message(&self, value: Value, declared_type: Option<MessageType>) -> Result<()> {
        let declared = declared_type.unwrap_or_else(|| MessageType::of_value(&value));
        self.send_envelope(Envelope::new(value, declared)).await
    }

    /// Send a serializable value declared as its Rust type
    pub async fn send<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send_envelope(Envelope::typed(value)?).await
    }

    /// Send a fully formed envelope
    pub async fn send_envelope(&self, mut envelope: Envelope) -> Result<()> {
        if envelope.trace.is_none() {
            envelope.trace = self.inner.trace.clone();
        }

        if self.inner.is_output {
            self.inner.run.events.emit(WorkflowEvent::Output {
                source_id: self.inner.executor_id.clone(),
                value: envelope.payload.clone(),
                declared_type: envelope.declared_type.clone(),
            });
        }

        self.inner
            .run
            .route_from(&self.inner.executor_id, &envelope);
        self.inner.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Raise a workflow event visible to the host
    pub fn raise_event(&self, payload: Value) {
        self.inner.run.events.emit(WorkflowEvent::AgentUpdate {
            executor_id: self.inner.executor_id.clone(),
            payload,
        });
    }

    /// Read a value from the step's published state snapshot
    pub fn read_state(&self, scope: &str, key: &str) -> Option<Value> {
        self.inner.run.states.read(scope, key)
    }

    /// Stage a state write, published at the step boundary
    pub fn queue_state_update(&self, scope: &str, key: &str, value: Value) {
        self.inner.run.states.queue_update(scope, key, value);
    }

    /// Stage a state removal, published at the step boundary
    pub fn queue_state_reset(&self, scope: &str, key: &str) {
        self.inner.run.states.queue_reset(scope, key);
    }

    /// Surface an external request through a declared port
    ///
    /// The request leaves the workflow as a `RequestInfo` event and blocks
    /// nothing: the executor continues, and the response re-enters the
    /// graph through the port when the host answers. Returns the request
    /// id.
    pub async fn post_request(&self, port_id: &str, payload: Value) -> Result<String> {
        let Some(port) = self.inner.run.workflow.port(port_id) else {
            return Err(WorkflowError::Execution(format!(
                "no input port named '{port_id}'"
            )));
        };

        let request = ExternalRequest {
            request_id: Uuid::new_v4().to_string(),
            port_id: port.port_id.clone(),
            payload,
            request_type: port.request_type.clone(),
            response_type: port.response_type.clone(),
        };
        let request_id = request.request_id.clone();
        self.inner.run.publish_request(request);
        Ok(request_id)
    }

    /// Token observing this run's cancellation
    ///
    /// Long-running handlers can await it to wind down early; the
    /// scheduler itself only stops between supersteps.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.run.cancel.clone()
    }

    /// Messages emitted through this context so far
    pub(crate) fn emitted_count(&self) -> usize {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    pub(crate) fn run(&self) -> &Arc<RunShared> {
        &self.inner.run
    }
}
