//! Executors: named units of user code
//!
//! An executor declares the message types it can handle and, for each, a
//! handler that consumes `(envelope, bound context)`. Handlers send
//! messages, raise events, stage scope state, and post external requests
//! through the [`WorkflowContext`] they are given; a handler that returns
//! a value behaves as if it had sent it.
//!
//! Most executors are built from closures with [`ExecutorBuilder`], which
//! assembles the registration table `{input type → handler}` described by
//! the runtime contract: exact type match wins, catch-all handlers are
//! the fallback, and earlier registration wins ties. Implementing
//! [`Executor`] directly is the escape hatch for stateful nodes that need
//! snapshot hooks or sub-workflow composition.

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::message::{Envelope, MessageType};
use crate::ports::ExternalResponse;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Activity report from driving a joined sub-workflow one superstep
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinedActivity {
    /// Whether this executor actually joins a child run
    pub joined: bool,
    /// Whether the child still has queued work after its step
    pub has_actions: bool,
}

/// A named unit of user code in the workflow graph
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable executor id, unique within a workflow
    fn id(&self) -> &str;

    /// Type id used in workflow fingerprints
    fn type_id(&self) -> &str {
        "executor"
    }

    /// Whether a message declared as `declared` has a handler here
    fn can_handle(&self, declared: &MessageType) -> bool;

    /// Handle one delivered envelope
    ///
    /// Called by the scheduler, sequentially per executor within a
    /// superstep. An error is an executor fault and is fatal for the run.
    async fn execute(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()>;

    /// Opaque state snapshot for checkpoints; `None` for stateless nodes
    async fn snapshot(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Reload notification after a checkpoint restore
    ///
    /// `snapshot` is the value this executor returned from
    /// [`snapshot`](Executor::snapshot) at commit time, if any. Stateful
    /// executors refresh caches here.
    async fn on_restore(&self, snapshot: Option<Value>) -> Result<()> {
        let _ = snapshot;
        Ok(())
    }

    /// Advance a joined child run by one superstep
    ///
    /// The scheduler calls this once per parent superstep so parent and
    /// child steps stay aligned. Non-composite executors keep the
    /// default.
    async fn drive_joined(&self, ctx: &WorkflowContext) -> Result<JoinedActivity> {
        let _ = ctx;
        Ok(JoinedActivity::default())
    }

    /// Whether this executor owns the named port, directly or through a
    /// child run
    fn owns_port(&self, port_id: &str) -> bool {
        let _ = port_id;
        false
    }

    /// Offer an external response addressed to a port this executor may
    /// own (directly or through a child run); `true` if consumed
    async fn accept_response(&self, response: ExternalResponse) -> Result<bool> {
        let _ = response;
        Ok(false)
    }
}

/// Boxed handler: the single internal signature every surface form
/// collapses to at registration
pub type HandlerFn =
    Arc<dyn Fn(Envelope, WorkflowContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct HandlerEntry {
    input: MessageType,
    handler: HandlerFn,
}

/// Executor assembled from a registration table of closures
pub struct FnExecutor {
    id: String,
    entries: Vec<HandlerEntry>,
}

impl FnExecutor {
    /// Start building an executor with the given id
    pub fn builder(id: impl Into<String>) -> ExecutorBuilder {
        ExecutorBuilder {
            id: id.into(),
            entries: Vec::new(),
        }
    }

    /// Resolve the handler for a declared type
    ///
    /// Exact registrations are preferred over catch-alls; within each
    /// pass, the earliest registration wins.
    fn resolve(&self, declared: &MessageType) -> Option<&HandlerEntry> {
        self.entries
            .iter()
            .find(|e| &e.input == declared)
            .or_else(|| self.entries.iter().find(|e| e.input.accepts(declared)))
    }
}

#[async_trait]
impl Executor for FnExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn can_handle(&self, declared: &MessageType) -> bool {
        self.entries.iter().any(|e| e.input.accepts(declared))
    }

    async fn execute(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let Some(entry) = self.resolve(&envelope.declared_type) else {
            return Err(WorkflowError::Execution(format!(
                "executor '{}' has no handler for '{}'",
                self.id, envelope.declared_type
            )));
        };
        (entry.handler)(envelope, ctx).await
    }
}

/// Builder for [`FnExecutor`]
///
/// ```rust,ignore
/// let judge = FnExecutor::builder("judge")
///     .handle("guess", |envelope, ctx| async move {
///         let guess: i64 = envelope.decode()?;
///         ctx.send_message(json!(guess > 42), Some("verdict".into())).await
///     })
///     .build();
/// ```
pub struct ExecutorBuilder {
    id: String,
    entries: Vec<HandlerEntry>,
}

impl ExecutorBuilder {
    /// Register a unit-returning handler for an input type
    pub fn handle<F, Fut>(mut self, input: impl Into<MessageType>, f: F) -> Self
    where
        F: Fn(Envelope, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.entries.push(HandlerEntry {
            input: input.into(),
            handler: Arc::new(move |envelope, ctx| Box::pin(f(envelope, ctx))),
        });
        self
    }

    /// Register a value-returning handler for an input type
    ///
    /// A returned envelope is sent as if the handler had called
    /// `send_envelope` itself, declared type included.
    pub fn handle_returning<F, Fut>(mut self, input: impl Into<MessageType>, f: F) -> Self
    where
        F: Fn(Envelope, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Envelope>>> + Send + 'static,
    {
        self.entries.push(HandlerEntry {
            input: input.into(),
            handler: Arc::new(move |envelope, ctx| {
                let fut = f(envelope, ctx.clone());
                Box::pin(async move {
                    if let Some(reply) = fut.await? {
                        ctx.send_envelope(reply).await?;
                    }
                    Ok(())
                })
            }),
        });
        self
    }

    /// Register a catch-all handler, used when no exact registration
    /// matches the declared type
    pub fn handle_any<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Envelope, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handle(MessageType::any(), f)
    }

    pub fn build(self) -> FnExecutor {
        FnExecutor {
            id: self.id,
            entries: self.entries,
        }
    }

    /// Build wrapped in `Arc<dyn Executor>`, the form the workflow
    /// builder consumes
    pub fn build_arc(self) -> Arc<dyn Executor> {
        Arc::new(self.build())
    }
}
