//! Host-facing run handle
//!
//! [`RunHandle`] is the control surface for one run: enqueue typed or raw
//! input, answer external requests, watch the event stream, restore a
//! checkpoint, cancel, dispose. Every operation is non-blocking except
//! [`join`](RunHandle::join), which waits for the run to end.
//!
//! The execution mode is fixed at start:
//!
//! - [`RunMode::OffThread`]: the scheduler loops on its own task,
//!   processing supersteps as long as work is queued.
//! - [`RunMode::Lockstep`]: the run advances exactly one superstep per
//!   host poll of the event stream (deterministic tests, debugging).
//! - [`RunMode::Subworkflow`]: no loop of its own; a parent runner
//!   drives each superstep in lock-step with its own.

use crate::builder::Workflow;
use crate::error::{Result, WorkflowError};
use crate::events::{HaltReason, RunStatus, StreamItem, WatchOptions, WorkflowEvent};
use crate::message::{Envelope, MessageType};
use crate::ports::ExternalResponse;
use crate::runner::{finalize, SuperstepRunner};
use crate::shared::RunShared;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use weft_checkpoint::{CheckpointId, CheckpointStore};

/// How a run's supersteps are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Autonomous loop on a spawned task
    #[default]
    OffThread,
    /// One superstep per host-triggered request for events
    Lockstep,
    /// Driven by a parent runner, one child step per parent step
    Subworkflow,
}

/// Run configuration
#[derive(Default)]
pub struct RunOptions {
    mode: RunMode,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    run_id: Option<String>,
    max_concurrency: Option<usize>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution mode (default: [`RunMode::OffThread`])
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Checkpoint after every superstep into the given store
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Fix the run id (defaults to a fresh uuid); checkpoints are
    /// addressed per run id, so resuming a prior run reuses its id
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Bound on concurrent per-recipient delivery tasks (default 8)
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}

impl Workflow {
    /// Start a run of this workflow
    pub fn start(self, options: RunOptions) -> RunHandle {
        RunHandle::launch(Arc::new(self), options)
    }
}

/// Host-facing control object for a single run
#[derive(Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
    runner: Arc<Mutex<SuperstepRunner>>,
    mode: RunMode,
    loop_active: Arc<AtomicBool>,
}

impl RunHandle {
    /// Create a run and, in off-thread mode, start its loop
    pub fn launch(workflow: Arc<Workflow>, options: RunOptions) -> Self {
        let shared = RunShared::new(workflow, options.run_id);
        let runner = Arc::new(Mutex::new(SuperstepRunner::new(
            shared.clone(),
            options.checkpoint_store,
            options.max_concurrency.unwrap_or(8),
        )));

        let handle = Self {
            shared,
            runner,
            mode: options.mode,
            loop_active: Arc::new(AtomicBool::new(false)),
        };
        if handle.mode == RunMode::OffThread {
            handle.ensure_loop();
        }
        handle
    }

    /// Opaque id of this run
    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// Current status
    pub fn status(&self) -> RunStatus {
        self.shared.status()
    }

    /// Enqueue a raw value, inferring its declared type from its shape
    pub async fn enqueue(&self, value: Value) -> Result<bool> {
        let declared = MessageType::of_value(&value);
        self.enqueue_envelope(Envelope::new(value, declared)).await
    }

    /// Enqueue a raw value under an explicit declared type
    pub async fn enqueue_as(&self, value: Value, declared_type: MessageType) -> Result<bool> {
        self.enqueue_envelope(Envelope::new(value, declared_type))
            .await
    }

    /// Enqueue a serializable value declared as its Rust type
    pub async fn enqueue_typed<T: Serialize>(&self, value: &T) -> Result<bool> {
        self.enqueue_envelope(Envelope::typed(value)?).await
    }

    /// Enqueue an envelope for the start executor
    ///
    /// An envelope carrying an [`ExternalResponse`] routes to the response
    /// queue instead. Before the run has started, the declared type must
    /// be accepted by the start executor; otherwise the call fails without
    /// changing any state. Once underway, input is type-gated at delivery
    /// like any other message.
    pub async fn enqueue_envelope(&self, envelope: Envelope) -> Result<bool> {
        self.ensure_live()?;

        if envelope.declared_type.as_str() == ExternalResponse::TYPE_ID {
            let response: ExternalResponse = envelope.decode()?;
            return self.respond(response).await;
        }

        let start = self.shared.workflow.start_executor_id().to_string();
        if !self.shared.started.load(Ordering::Acquire) {
            let accepts = self
                .shared
                .workflow
                .executor(&start)
                .map(|e| e.can_handle(&envelope.declared_type))
                .unwrap_or(false);
            if !accepts {
                return Err(WorkflowError::UnsupportedInputType {
                    executor: start,
                    type_id: envelope.declared_type.as_str().to_string(),
                });
            }
        }

        self.shared.deliver(vec![(start, envelope)]);
        self.shared.signal_input();
        Ok(true)
    }

    /// Answer an outstanding external request
    ///
    /// Validated against the port's declared response type when the port
    /// is local; a mismatch fails without changing any state. Responses
    /// addressed to ports owned by child runs are routed at the next step
    /// boundary.
    pub async fn respond(&self, response: ExternalResponse) -> Result<bool> {
        self.ensure_live()?;

        if let Some(port) = self.shared.workflow.port(&response.port_id) {
            if !port.response_type.accepts(&response.response_type) {
                return Err(WorkflowError::type_mismatch(
                    &port.port_id,
                    port.response_type.as_str(),
                    response.response_type.as_str(),
                ));
            }
        }

        self.shared.queue_response(response);
        Ok(true)
    }

    /// Watch the run's event stream
    ///
    /// At most one watcher may be active; a second call fails with
    /// [`WorkflowError::ConcurrentWatch`]. The stream ends cleanly after a
    /// terminal event, or (unless `block_on_pending_request` is set)
    /// when the run goes idle awaiting responses.
    pub fn watch_event_stream(
        &self,
        options: WatchOptions,
    ) -> Result<impl Stream<Item = WorkflowEvent> + Send + 'static> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(WorkflowError::RunEnded("run disposed".to_string()));
        }
        if !self.shared.events.try_claim_watcher() {
            return Err(WorkflowError::ConcurrentWatch);
        }

        let shared = self.shared.clone();
        let runner = self.runner.clone();
        let lockstep = self.mode == RunMode::Lockstep;
        // Created before the stream so the slot is released even if the
        // stream is dropped unpolled.
        let guard = WatcherGuard(shared.clone());

        Ok(async_stream::stream! {
            let _guard = guard;
            loop {
                let item = if lockstep {
                    match shared.events.try_next() {
                        Some(item) => Some(item),
                        None if shared.events.is_closed() => None,
                        None => {
                            match advance_once(&shared, &runner).await {
                                Progress::Stepped | Progress::Finalized => continue,
                                Progress::Idle => {
                                    if !options.block_on_pending_request {
                                        break;
                                    }
                                    shared.set_status(RunStatus::AwaitingInput);
                                    tokio::select! {
                                        _ = shared.input_notify.notified() => {},
                                        _ = shared.cancel.cancelled() => {},
                                    }
                                    continue;
                                }
                            }
                        }
                    }
                } else {
                    shared.events.next().await
                };

                match item {
                    None => break,
                    Some(StreamItem::Event(event)) => {
                        yield event;
                    }
                    Some(StreamItem::RequestHalt { pending_requests }) => {
                        if pending_requests && options.block_on_pending_request {
                            continue;
                        }
                        break;
                    }
                }
            }
        })
    }

    /// Manually advance one superstep (lockstep and subworkflow modes)
    ///
    /// Returns whether a step actually ran.
    pub async fn step(&self) -> Result<bool> {
        self.ensure_live()?;
        let mut runner = self.runner.lock().await;
        runner.run_superstep().await
    }

    /// Wait until the run ends and return the terminal status
    ///
    /// In lockstep mode this drives the run itself.
    pub async fn join(&self) -> Result<RunStatus> {
        match self.mode {
            RunMode::OffThread => {
                let mut watch = self.shared.status_watch();
                loop {
                    let status = *watch.borrow();
                    if !status.is_live() {
                        return Ok(status);
                    }
                    if watch.changed().await.is_err() {
                        return Ok(self.shared.status());
                    }
                }
            }
            RunMode::Lockstep | RunMode::Subworkflow => loop {
                let status = self.shared.status();
                if !status.is_live() {
                    return Ok(status);
                }
                match advance_once(&self.shared, &self.runner).await {
                    Progress::Stepped | Progress::Finalized => {}
                    Progress::Idle => {
                        self.shared.set_status(RunStatus::AwaitingInput);
                        tokio::select! {
                            _ = self.shared.input_notify.notified() => {},
                            _ = self.shared.cancel.cancelled() => {
                                finalize(&self.shared, HaltReason::Cancelled);
                            },
                        }
                    }
                }
            },
        }
    }

    /// Restore the run from a committed checkpoint
    ///
    /// Delegates to the restore protocol: fingerprint validation first (an
    /// incompatible checkpoint leaves the run untouched), then state
    /// import, executor reload notification, request republication, and a
    /// wake-up of the run loop. Restoring a halted run revives it.
    pub async fn restore_checkpoint(&self, checkpoint_id: &CheckpointId) -> Result<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(WorkflowError::RunEnded("run disposed".to_string()));
        }

        let mut runner = self.runner.lock().await;
        let checkpoint = runner
            .lookup_checkpoint(&self.shared.run_id, checkpoint_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::Checkpoint(weft_checkpoint::CheckpointError::NotFound(
                    checkpoint_id.clone(),
                ))
            })?;
        runner.restore(checkpoint).await?;
        drop(runner);

        self.shared.events.reopen();
        self.shared.set_status(RunStatus::AwaitingInput);
        if self.mode == RunMode::OffThread {
            self.ensure_loop();
        }
        Ok(())
    }

    /// Cancel the run; idempotent
    ///
    /// Handlers mid-flight finish, no further steps begin, and the event
    /// stream ends with a `Halted` event.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        self.shared.signal_input();
        if self.mode != RunMode::OffThread {
            finalize(&self.shared, HaltReason::Cancelled);
        }
    }

    /// Cancel and release the run; further operations fail with `RunEnded`
    pub fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::Release);
        self.shared.cancel.cancel();
        self.shared.signal_input();
        finalize(&self.shared, HaltReason::Cancelled);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(WorkflowError::RunEnded("run disposed".to_string()));
        }
        match self.shared.status() {
            RunStatus::Halted => Err(WorkflowError::RunEnded("run halted".to_string())),
            RunStatus::Failed => Err(WorkflowError::RunEnded("run failed".to_string())),
            _ => Ok(()),
        }
    }

    /// Spawn the autonomous loop if it is not already running
    fn ensure_loop(&self) {
        if self
            .loop_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let shared = self.shared.clone();
        let runner = self.runner.clone();
        let loop_active = self.loop_active.clone();
        tokio::spawn(async move {
            off_thread_loop(shared, runner).await;
            loop_active.store(false, Ordering::Release);
        });
    }

    pub(crate) fn shared(&self) -> &Arc<RunShared> {
        &self.shared
    }

    pub(crate) fn runner(&self) -> &Arc<Mutex<SuperstepRunner>> {
        &self.runner
    }
}

/// Outcome of one attempt to make progress
enum Progress {
    /// A superstep ran
    Stepped,
    /// Nothing queued; the run stays alive awaiting input
    Idle,
    /// The run reached a terminal state
    Finalized,
}

/// Drive one superstep, or settle the run's fate when idle
async fn advance_once(shared: &Arc<RunShared>, runner: &Arc<Mutex<SuperstepRunner>>) -> Progress {
    if shared.cancel.is_cancelled() {
        finalize(shared, HaltReason::Cancelled);
        return Progress::Finalized;
    }

    let stepped = {
        let mut runner = runner.lock().await;
        runner.run_superstep().await
    };

    match stepped {
        // Failure bookkeeping already ran inside the scheduler.
        Err(_) => Progress::Finalized,
        Ok(true) => Progress::Stepped,
        Ok(false) => {
            let started = shared.started.load(Ordering::Acquire);
            if shared.has_outstanding_requests() || !started {
                Progress::Idle
            } else if shared.has_pending_work() {
                Progress::Stepped
            } else {
                finalize(shared, HaltReason::Completed);
                Progress::Finalized
            }
        }
    }
}

/// Autonomous scheduler loop for off-thread runs
async fn off_thread_loop(shared: Arc<RunShared>, runner: Arc<Mutex<SuperstepRunner>>) {
    loop {
        match advance_once(&shared, &runner).await {
            Progress::Stepped => {}
            Progress::Finalized => break,
            Progress::Idle => {
                if shared.started.load(Ordering::Acquire) {
                    shared.set_status(RunStatus::AwaitingInput);
                    shared.events.emit_request_halt(true);
                }
                tokio::select! {
                    _ = shared.input_notify.notified() => {},
                    _ = shared.cancel.cancelled() => {},
                }
            }
        }
    }
}

/// Releases the single-watcher slot when a stream is dropped
struct WatcherGuard(Arc<RunShared>);

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.0.events.release_watcher();
    }
}
