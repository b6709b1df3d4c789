//! Sub-workflow composition
//!
//! [`WorkflowExecutor`] wraps a whole child workflow as a single executor
//! in a parent graph. The child runs in [`RunMode::Subworkflow`]: it never
//! spins a loop of its own, and the parent scheduler advances it by
//! exactly one child superstep per parent superstep, keeping global step
//! alignment.
//!
//! Traffic crosses the boundary in both directions:
//!
//! - messages delivered to the wrapper enter the child through its start
//!   executor;
//! - child outputs re-enter the parent graph as messages emitted from the
//!   wrapper's id;
//! - child external requests are republished on the parent, so the host
//!   sees one stream of prompts; responses route back down through
//!   [`Executor::accept_response`].
//!
//! The child's checkpoint embeds in the parent checkpoint through the
//! wrapper's snapshot hook, so suspending the parent suspends the whole
//! tree.

use crate::builder::Workflow;
use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::events::{StreamItem, WorkflowEvent};
use crate::executor::{Executor, JoinedActivity};
use crate::handle::{RunHandle, RunMode, RunOptions};
use crate::message::{Envelope, MessageType};
use crate::ports::{ExternalRequest, ExternalResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A child workflow embedded as one executor of a parent graph
pub struct WorkflowExecutor {
    id: String,
    child: RunHandle,
}

impl WorkflowExecutor {
    /// Wrap a workflow under the given executor id
    pub fn new(id: impl Into<String>, workflow: Workflow) -> Self {
        let id = id.into();
        let child = workflow.start(
            RunOptions::new()
                .with_mode(RunMode::Subworkflow)
                .with_run_id(format!("sub:{id}")),
        );
        Self { id, child }
    }

    /// Wrap in `Arc<dyn Executor>`, the form the workflow builder consumes
    pub fn into_arc(self) -> Arc<dyn Executor> {
        Arc::new(self)
    }

    /// Forward buffered child events into the parent run
    async fn forward_child_events(&self, ctx: &WorkflowContext) -> Result<()> {
        while let Some(item) = self.child.shared().events.try_next() {
            let StreamItem::Event(event) = item else {
                continue;
            };
            match event {
                WorkflowEvent::Output {
                    value,
                    declared_type,
                    ..
                } => {
                    // Child outputs become parent messages from this id.
                    ctx.send_message(value, Some(declared_type)).await?;
                }
                WorkflowEvent::RequestInfo {
                    request_id,
                    port_id,
                    payload,
                    request_type,
                    response_type,
                } => {
                    ctx.run().publish_request(ExternalRequest {
                        request_id,
                        port_id,
                        payload,
                        request_type,
                        response_type,
                    });
                }
                WorkflowEvent::AgentUpdate {
                    executor_id,
                    payload,
                } => {
                    ctx.run().events.emit(WorkflowEvent::AgentUpdate {
                        executor_id: format!("{}/{}", self.id, executor_id),
                        payload,
                    });
                }
                WorkflowEvent::ExecutorFailed { executor_id, error } => {
                    return Err(WorkflowError::executor_fault(
                        format!("{}/{}", self.id, executor_id),
                        error,
                    ));
                }
                // Step bookkeeping stays internal to the child.
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for WorkflowExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_id(&self) -> &str {
        "subworkflow"
    }

    fn can_handle(&self, declared: &MessageType) -> bool {
        let workflow = &self.child.shared().workflow;
        workflow
            .executor(workflow.start_executor_id())
            .map(|e| e.can_handle(declared))
            .unwrap_or(false)
    }

    async fn execute(&self, envelope: Envelope, _ctx: WorkflowContext) -> Result<()> {
        self.child.enqueue_envelope(envelope).await?;
        Ok(())
    }

    fn owns_port(&self, port_id: &str) -> bool {
        let workflow = &self.child.shared().workflow;
        workflow.port(port_id).is_some()
            || workflow.executors().any(|e| e.owns_port(port_id))
    }

    async fn accept_response(&self, response: ExternalResponse) -> Result<bool> {
        if !self.owns_port(&response.port_id) {
            return Ok(false);
        }
        self.child.respond(response).await?;
        Ok(true)
    }

    async fn drive_joined(&self, ctx: &WorkflowContext) -> Result<JoinedActivity> {
        let nested_actions = self.child.runner().lock().await.has_joined_actions();
        if self.child.shared().has_pending_work() || nested_actions {
            self.child.step().await?;
        }
        self.forward_child_events(ctx).await?;

        let nested_actions = self.child.runner().lock().await.has_joined_actions();
        Ok(JoinedActivity {
            joined: true,
            has_actions: self.child.shared().has_pending_work() || nested_actions,
        })
    }

    async fn snapshot(&self) -> Result<Option<Value>> {
        let runner = self.child.runner().lock().await;
        let checkpoint = runner.build_checkpoint().await?;
        Ok(Some(serde_json::to_value(checkpoint)?))
    }

    async fn on_restore(&self, snapshot: Option<Value>) -> Result<()> {
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        let checkpoint: weft_checkpoint::RunCheckpoint = serde_json::from_value(snapshot)?;
        let mut runner = self.child.runner().lock().await;
        runner.restore(checkpoint).await?;
        // The restore republished the child's pending requests into its
        // own buffer; the next drive forwards them upward.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::executor::FnExecutor;
    use crate::shared::RunShared;
    use serde_json::json;

    fn doubling_child() -> Workflow {
        WorkflowBuilder::new()
            .add_executor(
                FnExecutor::builder("double")
                    .handle_any(|envelope, ctx| async move {
                        let n = envelope.payload.as_i64().unwrap_or(0);
                        ctx.send_message(json!(n * 2), Some(MessageType::integer()))
                            .await
                    })
                    .build_arc(),
            )
            .set_start("double")
            .declare_output("double")
            .build()
            .unwrap()
    }

    fn parent_shared() -> Arc<RunShared> {
        let workflow = WorkflowBuilder::new()
            .add_executor(WorkflowExecutor::new("child", doubling_child()).into_arc())
            .add_executor(
                FnExecutor::builder("sink")
                    .handle_any(|_, _| async { Ok(()) })
                    .build_arc(),
            )
            .add_edge("child", "sink")
            .set_start("child")
            .build()
            .unwrap();
        RunShared::for_test(workflow)
    }

    #[tokio::test]
    async fn test_child_output_reenters_parent_graph() {
        let shared = parent_shared();
        let wrapper = shared.workflow.executor("child").cloned().unwrap();

        // Parent delivers into the wrapper; the message enters the child.
        wrapper
            .execute(
                Envelope::new(json!(21), MessageType::integer()),
                shared.bind_context("child", None),
            )
            .await
            .unwrap();

        // One parent step drives one child step; the child's output is
        // routed from the wrapper toward "sink".
        let ctx = shared.bind_context("child", None);
        let activity = wrapper.drive_joined(&ctx).await.unwrap();
        assert!(activity.joined);

        let drained = shared.next_inbox.drain();
        assert_eq!(drained["sink"][0].payload, json!(42));
    }

    #[tokio::test]
    async fn test_idle_child_reports_no_actions() {
        let shared = parent_shared();
        let wrapper = shared.workflow.executor("child").cloned().unwrap();
        let ctx = shared.bind_context("child", None);

        let activity = wrapper.drive_joined(&ctx).await.unwrap();
        assert!(activity.joined);
        assert!(!activity.has_actions);
    }

    #[tokio::test]
    async fn test_child_checkpoint_embeds_and_restores() {
        let shared = parent_shared();
        let wrapper = shared.workflow.executor("child").cloned().unwrap();

        wrapper
            .execute(
                Envelope::new(json!(5), MessageType::integer()),
                shared.bind_context("child", None),
            )
            .await
            .unwrap();

        // Snapshot with the child's input still queued.
        let snapshot = wrapper.snapshot().await.unwrap().unwrap();

        // A fresh wrapper over the same child shape resumes mid-flight.
        let shared2 = parent_shared();
        let wrapper2 = shared2.workflow.executor("child").cloned().unwrap();
        wrapper2.on_restore(Some(snapshot)).await.unwrap();

        let ctx = shared2.bind_context("child", None);
        wrapper2.drive_joined(&ctx).await.unwrap();

        let drained = shared2.next_inbox.drain();
        assert_eq!(drained["sink"][0].payload, json!(10));
    }
}
