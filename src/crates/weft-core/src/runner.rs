//! The superstep scheduler
//!
//! One superstep is one atomic round: drain every message queued for the
//! step, deliver concurrently across recipients (strictly FIFO within
//! each recipient), route emissions into the *next* step's inbox, advance
//! joined sub-workflows by exactly one of their own steps, publish staged
//! scope state, optionally commit a checkpoint, and report completion.
//!
//! ```text
//! superstep N
//! ├── route queued external responses into the inbox
//! ├── swap: next-step inbox becomes current
//! ├── deliver per recipient          (concurrent across recipients,
//! │     handler emissions → step N+1  sequential within one recipient)
//! ├── drive joined children one child superstep each
//! ├── publish staged scope updates   (atomic)
//! ├── commit checkpoint              (when a store is configured)
//! └── emit SuperStepCompleted { has_actions, has_requests, checkpoint_id }
//! ```
//!
//! Handler faults are terminal: the step's in-flight deliveries run to
//! completion, an `ExecutorFailed` event is emitted, and the run ends.
//! Cancellation is observed between supersteps; an in-flight step also
//! runs to completion.

use crate::error::{Result, WorkflowError};
use crate::events::{HaltReason, RunStatus, WorkflowEvent};
use crate::executor::Executor;
use crate::message::Envelope;
use crate::ports::ExternalRequest;
use crate::shared::RunShared;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use weft_checkpoint::{
    CheckpointId, CheckpointStore, RunCheckpoint, RunnerStateRecord,
};

/// Superstep scheduler for one run
///
/// Exclusively owns step advancement; the host reaches it through the run
/// handle behind a lock, so a restore never interleaves with a step.
pub(crate) struct SuperstepRunner {
    shared: Arc<RunShared>,
    step: u64,
    max_concurrency: usize,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    /// Whether any joined child reported queued work after the last step;
    /// a parent with an empty inbox still steps while a child has actions
    child_has_actions: bool,
}

impl SuperstepRunner {
    pub fn new(
        shared: Arc<RunShared>,
        checkpoint_store: Option<Arc<dyn CheckpointStore>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            shared,
            step: 0,
            max_concurrency: max_concurrency.max(1),
            checkpoint_store,
            child_has_actions: false,
        }
    }

    /// Whether a joined child still had queued work after the last step
    pub fn has_joined_actions(&self) -> bool {
        self.child_has_actions
    }

    pub fn step_number(&self) -> u64 {
        self.step
    }

    /// Fetch a checkpoint from the configured store
    pub async fn lookup_checkpoint(
        &self,
        run_id: &str,
        checkpoint_id: &CheckpointId,
    ) -> Result<Option<RunCheckpoint>> {
        let Some(store) = &self.checkpoint_store else {
            return Err(WorkflowError::Execution(
                "run has no checkpoint store configured".to_string(),
            ));
        };
        Ok(store.lookup(run_id, checkpoint_id).await?)
    }

    /// Execute one superstep
    ///
    /// Returns `Ok(false)` without consuming a step number when nothing is
    /// queued. A handler fault returns the fault after the failure
    /// bookkeeping (event, status, cancellation) has run.
    pub async fn run_superstep(&mut self) -> Result<bool> {
        self.route_pending_responses().await?;

        let current = self.shared.next_inbox.drain();
        if current.is_empty() && !self.child_has_actions {
            return Ok(false);
        }

        self.step += 1;
        self.shared.started.store(true, Ordering::Release);
        self.shared.set_status(RunStatus::Running);
        self.shared
            .events
            .emit(WorkflowEvent::StepStarted { step: self.step });
        tracing::debug!(step = self.step, recipients = current.len(), "superstep started");

        // Deterministic recipient order so delivery interleaving is the
        // only source of concurrency.
        let mut recipients: Vec<(String, VecDeque<Envelope>)> = current.into_iter().collect();
        recipients.sort_by(|(a, _), (b, _)| a.cmp(b));

        let deliveries = recipients.into_iter().filter_map(|(recipient, queue)| {
            let Some(executor) = self.shared.workflow.executor(&recipient).cloned() else {
                tracing::warn!(recipient, "inbox for unknown executor discarded");
                return None;
            };
            let shared = self.shared.clone();
            Some(async move { deliver_to_recipient(shared, executor, recipient, queue).await })
        });

        let outcomes: Vec<std::result::Result<(), (String, WorkflowError)>> =
            stream::iter(deliveries)
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

        if let Some((executor_id, error)) = outcomes.into_iter().find_map(|r| r.err()) {
            return Err(self.fail(executor_id, error));
        }

        self.child_has_actions = match self.drive_joined_children().await {
            Ok(has_actions) => has_actions,
            Err((executor_id, error)) => return Err(self.fail(executor_id, error)),
        };

        let published = self.shared.states.publish();
        if published > 0 {
            tracing::debug!(step = self.step, updates = published, "scope state published");
        }

        let checkpoint_id = self.commit_checkpoint().await?;

        let has_actions = self.shared.has_pending_work() || self.child_has_actions;
        let has_requests = self.shared.has_outstanding_requests();
        self.shared.events.emit(WorkflowEvent::SuperStepCompleted {
            step: self.step,
            has_actions,
            has_requests,
            checkpoint_id,
        });

        Ok(true)
    }

    /// Route host responses accepted since the last boundary
    ///
    /// A response addressed to a local port enters that port's inbox; one
    /// addressed elsewhere is offered to composite executors, which may
    /// own the port through a child run. Unclaimed responses are dropped.
    async fn route_pending_responses(&mut self) -> Result<()> {
        for response in self.shared.take_responses() {
            if self.shared.workflow.port(&response.port_id).is_some() {
                let recipient = response.port_id.clone();
                let envelope = response.into_envelope()?;
                self.shared.next_inbox.enqueue(&recipient, envelope);
                continue;
            }

            let mut claimed = false;
            for id in self.sorted_executor_ids() {
                let executor = self
                    .shared
                    .workflow
                    .executor(&id)
                    .cloned()
                    .expect("sorted id resolves");
                if executor.accept_response(response.clone()).await? {
                    // Retire the forwarded entry tracked at this level.
                    self.shared
                        .complete_request(&response.port_id, response.request_id.as_deref());
                    claimed = true;
                    break;
                }
            }
            if !claimed {
                tracing::warn!(
                    port_id = %response.port_id,
                    "response does not match any port; dropped"
                );
            }
        }
        Ok(())
    }

    /// Advance every joined child run by one superstep
    async fn drive_joined_children(
        &self,
    ) -> std::result::Result<bool, (String, WorkflowError)> {
        let mut has_actions = false;
        for id in self.sorted_executor_ids() {
            let executor = self
                .shared
                .workflow
                .executor(&id)
                .cloned()
                .expect("sorted id resolves");
            let ctx = self.shared.bind_context(&id, None);
            match executor.drive_joined(&ctx).await {
                Ok(activity) => has_actions |= activity.joined && activity.has_actions,
                Err(error) => return Err((id, error)),
            }
        }
        Ok(has_actions)
    }

    fn sorted_executor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .workflow
            .executors()
            .map(|e| e.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    async fn commit_checkpoint(&self) -> Result<Option<CheckpointId>> {
        let Some(store) = &self.checkpoint_store else {
            return Ok(None);
        };
        let checkpoint = self.build_checkpoint().await?;
        let id = store.commit(&self.shared.run_id, checkpoint).await?;
        tracing::debug!(step = self.step, checkpoint_id = %id, "checkpoint committed");
        Ok(Some(id))
    }

    /// Snapshot the run into a checkpoint record
    pub async fn build_checkpoint(&self) -> Result<RunCheckpoint> {
        let mut runner_state = RunnerStateRecord {
            next_step_inbox: self.shared.next_inbox.export(),
            outstanding_requests: self
                .shared
                .requests
                .lock()
                .expect("request lock poisoned")
                .iter()
                .map(ExternalRequest::to_record)
                .collect(),
            queued_responses: self
                .shared
                .responses
                .lock()
                .expect("response lock poisoned")
                .iter()
                .map(|r| r.to_record())
                .collect(),
            executor_state: Default::default(),
        };

        for id in self.sorted_executor_ids() {
            let executor = self
                .shared
                .workflow
                .executor(&id)
                .cloned()
                .expect("sorted id resolves");
            if let Some(snapshot) = executor.snapshot().await? {
                runner_state.executor_state.insert(id, snapshot);
            }
        }

        Ok(
            RunCheckpoint::new(self.step, self.shared.workflow.fingerprint())
                .with_runner_state(runner_state)
                .with_scope_state(self.shared.states.export())
                .with_edge_state(self.shared.router.export_state()?),
        )
    }

    /// Restore protocol: validate, clear, import, notify, republish
    ///
    /// The fingerprint is validated before anything is touched, so an
    /// incompatible checkpoint leaves the run exactly as it was.
    pub async fn restore(&mut self, checkpoint: RunCheckpoint) -> Result<()> {
        let own = self.shared.workflow.fingerprint();
        if !own.matches(&checkpoint.fingerprint) {
            let detail = checkpoint
                .fingerprint
                .diff(&own)
                .unwrap_or_else(|| "fingerprint mismatch".to_string());
            return Err(WorkflowError::CheckpointIncompatible(detail));
        }

        self.shared.events.clear();

        self.shared.states.import(checkpoint.scope_state);
        self.shared.router.import_state(checkpoint.edge_state)?;
        self.shared
            .next_inbox
            .import(checkpoint.runner_state.next_step_inbox);

        let requests: Vec<ExternalRequest> = checkpoint
            .runner_state
            .outstanding_requests
            .into_iter()
            .map(ExternalRequest::from_record)
            .collect();
        *self.shared.requests.lock().expect("request lock poisoned") = requests.clone();
        *self.shared.responses.lock().expect("response lock poisoned") = checkpoint
            .runner_state
            .queued_responses
            .into_iter()
            .map(crate::ports::ExternalResponse::from_record)
            .collect();

        // Restored children may hold queued work; assume activity until
        // the next step observes them directly.
        self.child_has_actions = !checkpoint.runner_state.executor_state.is_empty();

        let mut executor_state = checkpoint.runner_state.executor_state;
        for id in self.sorted_executor_ids() {
            let executor = self
                .shared
                .workflow
                .executor(&id)
                .cloned()
                .expect("sorted id resolves");
            executor.on_restore(executor_state.remove(&id)).await?;
        }

        // Hosts resuming a run observe the same pending prompts as before.
        for request in &requests {
            self.shared.events.emit(WorkflowEvent::RequestInfo {
                request_id: request.request_id.clone(),
                port_id: request.port_id.clone(),
                payload: request.payload.clone(),
                request_type: request.request_type.clone(),
                response_type: request.response_type.clone(),
            });
        }

        self.step = checkpoint.step_number;
        if self.step > 0 {
            self.shared.started.store(true, Ordering::Release);
        }
        self.shared.signal_input();
        tracing::debug!(step = self.step, "checkpoint restored");
        Ok(())
    }

    /// Failure bookkeeping: event, status, cancellation, stream close
    fn fail(&self, executor_id: String, error: WorkflowError) -> WorkflowError {
        tracing::error!(executor = %executor_id, %error, "executor fault; run ends");
        let fault = WorkflowError::executor_fault(&executor_id, error.to_string());
        self.shared.events.emit(WorkflowEvent::ExecutorFailed {
            executor_id,
            error: error.to_string(),
        });
        self.shared.set_status(RunStatus::Failed);
        self.shared.cancel.cancel();
        self.shared.events.close();
        fault
    }
}

/// Drain one recipient's step queue, strictly in order
async fn deliver_to_recipient(
    shared: Arc<RunShared>,
    executor: Arc<dyn Executor>,
    recipient: String,
    queue: VecDeque<Envelope>,
) -> std::result::Result<(), (String, WorkflowError)> {
    for envelope in queue {
        shared.events.emit(WorkflowEvent::ExecutorInvoked {
            executor_id: recipient.clone(),
        });

        let ctx = shared.bind_context(&recipient, envelope.trace.clone());
        match executor.execute(envelope, ctx.clone()).await {
            Ok(()) => {
                shared.events.emit(WorkflowEvent::ExecutorCompleted {
                    executor_id: recipient.clone(),
                    emitted: ctx.emitted_count(),
                });
            }
            Err(error) => return Err((recipient, error)),
        }
    }
    Ok(())
}

/// Terminal bookkeeping for a run that ends without a fault
pub(crate) fn finalize(shared: &RunShared, reason: HaltReason) {
    if !shared.status().is_live() {
        return;
    }
    shared.set_status(RunStatus::Halted);
    shared.events.emit(WorkflowEvent::Halted { reason });
    shared.events.close();
    tracing::debug!(%reason, "run halted");
}
