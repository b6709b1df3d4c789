//! Run-shared state
//!
//! [`RunShared`] is the slice of a run that more than one party touches:
//! handlers (through their bound context), the scheduler, and the host
//! (through the run handle). The scheduler remains the only writer to the
//! current-step inbox; everything here is the next-step side, the
//! external request/response traffic, and the event/cancellation plumbing.

use crate::builder::Workflow;
use crate::context::WorkflowContext;
use crate::edge::{Delivery, EdgeRouter};
use crate::events::{EventChannel, RunStatus, WorkflowEvent};
use crate::message::{Envelope, TraceContext};
use crate::ports::{ExternalRequest, ExternalResponse};
use crate::state::StateManager;
use crate::step::StepInbox;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) struct RunShared {
    pub run_id: String,
    pub workflow: Arc<Workflow>,
    pub router: EdgeRouter,
    /// Inbox accumulating deliveries for the next superstep
    pub next_inbox: StepInbox,
    pub states: StateManager,
    /// External requests that have left the run and await a response
    pub requests: Mutex<Vec<ExternalRequest>>,
    /// External responses accepted from the host, not yet routed
    pub responses: Mutex<VecDeque<ExternalResponse>>,
    pub events: EventChannel,
    pub cancel: CancellationToken,
    /// Woken when the host enqueues input or a response
    pub input_notify: Notify,
    status: watch::Sender<RunStatus>,
    /// Set once the first superstep begins
    pub started: AtomicBool,
    pub disposed: AtomicBool,
}

impl RunShared {
    pub fn new(workflow: Arc<Workflow>, run_id: Option<String>) -> Arc<Self> {
        let (status, _) = watch::channel(RunStatus::AwaitingInput);
        Arc::new(Self {
            run_id: run_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            router: EdgeRouter::new(workflow.edges().to_vec()),
            workflow,
            next_inbox: StepInbox::new(),
            states: StateManager::new(),
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            events: EventChannel::new(),
            cancel: CancellationToken::new(),
            input_notify: Notify::new(),
            status,
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Bind a handler-facing context for one executor invocation
    pub fn bind_context(
        self: &Arc<Self>,
        executor_id: &str,
        trace: Option<TraceContext>,
    ) -> WorkflowContext {
        WorkflowContext::bind(self.clone(), executor_id.to_string(), trace)
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn set_status(&self, status: RunStatus) {
        self.status.send_replace(status);
    }

    /// Subscribe to status changes (used by `join`)
    pub fn status_watch(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Wake the run loop: input or a response is available
    pub fn signal_input(&self) {
        self.input_notify.notify_one();
    }

    /// Enqueue routed deliveries for the next superstep
    ///
    /// Deliveries are type-gated here: a recipient that never declared the
    /// envelope's type simply does not receive it.
    pub fn deliver(&self, deliveries: Vec<Delivery>) {
        for (target, envelope) in deliveries {
            match self.workflow.executor(&target) {
                None => {
                    tracing::warn!(target, "delivery to unknown executor dropped");
                }
                Some(executor) if !executor.can_handle(&envelope.declared_type) => {
                    tracing::debug!(
                        target,
                        type_id = %envelope.declared_type,
                        "recipient does not handle type; delivery dropped"
                    );
                }
                Some(_) => self.next_inbox.enqueue(&target, envelope),
            }
        }
    }

    /// Route one emission from an executor into the next superstep
    pub fn route_from(&self, source: &str, envelope: &Envelope) {
        let deliveries = self.router.route(source, envelope);
        self.deliver(deliveries);
    }

    /// Record an outstanding external request and surface it to the host
    ///
    /// Idempotent per request id: republishing an already-tracked request
    /// re-emits its `RequestInfo` event without duplicating the entry.
    pub fn publish_request(&self, request: ExternalRequest) {
        self.events.emit(WorkflowEvent::RequestInfo {
            request_id: request.request_id.clone(),
            port_id: request.port_id.clone(),
            payload: request.payload.clone(),
            request_type: request.request_type.clone(),
            response_type: request.response_type.clone(),
        });
        let mut requests = self.requests.lock().expect("request lock poisoned");
        if !requests.iter().any(|r| r.request_id == request.request_id) {
            requests.push(request);
        }
    }

    /// Retire an outstanding request once its response has been routed
    ///
    /// Responses that name a request id retire that request; anonymous
    /// responses retire the oldest request on the same port.
    pub fn complete_request(&self, port_id: &str, request_id: Option<&str>) {
        let mut requests = self.requests.lock().expect("request lock poisoned");
        let position = requests.iter().position(|r| match request_id {
            Some(id) => r.request_id == id,
            None => r.port_id == port_id,
        });
        match position {
            Some(idx) => {
                requests.remove(idx);
            }
            None => {
                tracing::warn!(port_id, ?request_id, "response without an outstanding request");
            }
        }
    }

    pub fn has_outstanding_requests(&self) -> bool {
        !self.requests.lock().expect("request lock poisoned").is_empty()
    }

    /// Whether the run has anything to process next step
    pub fn has_pending_work(&self) -> bool {
        self.next_inbox.has_messages()
            || !self
                .responses
                .lock()
                .expect("response lock poisoned")
                .is_empty()
    }

    /// Accept an external response for routing at the next step boundary
    pub fn queue_response(&self, response: ExternalResponse) {
        self.responses
            .lock()
            .expect("response lock poisoned")
            .push_back(response);
        self.signal_input();
    }

    /// Drain responses queued since the last step boundary
    pub fn take_responses(&self) -> Vec<ExternalResponse> {
        self.responses
            .lock()
            .expect("response lock poisoned")
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
impl RunShared {
    /// Bare shared state for unit tests that only need a bound context
    pub(crate) fn for_test(workflow: Workflow) -> Arc<Self> {
        Self::new(Arc::new(workflow), Some("test-run".to_string()))
    }
}
