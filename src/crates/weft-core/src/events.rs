//! Host-visible workflow events and the run event channel
//!
//! The runtime reports progress as a single ordered sequence of
//! [`WorkflowEvent`]s per run. Events are buffered inside the run until a
//! watcher drains them; at most one watcher may be active at a time, and
//! the stream always ends with a terminal event ([`WorkflowEvent::Halted`]
//! or [`WorkflowEvent::ExecutorFailed`]) so hosts can observe why a run
//! ended.
//!
//! The internal halt-request signal the scheduler uses for termination
//! detection never reaches the public stream; watchers see it only as the
//! stream ending (or, with `block_on_pending_request`, as the stream
//! staying open while requests are pending).

use crate::message::MessageType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// No queued messages, no pending requests, no child actions
    Completed,
    /// The host cancelled the run
    Cancelled,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Events observable on a run's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A superstep began
    StepStarted {
        /// Step number (1-based)
        step: u64,
    },

    /// A superstep finished
    SuperStepCompleted {
        /// Step number that completed
        step: u64,
        /// Whether the next step has queued messages
        has_actions: bool,
        /// Whether external requests are outstanding
        has_requests: bool,
        /// Id of the checkpoint written at this boundary, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        checkpoint_id: Option<String>,
    },

    /// An executor began handling a delivered message
    ExecutorInvoked {
        executor_id: String,
    },

    /// An executor finished handling a delivered message
    ExecutorCompleted {
        executor_id: String,
        /// Messages the handler emitted during this invocation
        emitted: usize,
    },

    /// An executor's handler failed; terminal for the run
    ExecutorFailed {
        executor_id: String,
        error: String,
    },

    /// An output-producing executor surfaced a value
    Output {
        source_id: String,
        value: Value,
        declared_type: MessageType,
    },

    /// An external request left the workflow through a port
    RequestInfo {
        request_id: String,
        port_id: String,
        payload: Value,
        request_type: MessageType,
        response_type: MessageType,
    },

    /// Opaque pass-through for an event a handler raised
    AgentUpdate {
        executor_id: String,
        payload: Value,
    },

    /// The run stopped; terminal
    Halted {
        reason: HaltReason,
    },
}

/// Host-visible run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Supersteps are being processed or work is queued
    Running,
    /// Idle with outstanding external requests or awaiting first input
    AwaitingInput,
    /// Ended normally or by cancellation
    Halted,
    /// Ended by an executor fault
    Failed,
}

impl RunStatus {
    /// Whether the run can still make progress
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingInput)
    }
}

/// Options for [`watch_event_stream`](crate::handle::RunHandle::watch_event_stream)
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Keep the stream open while external requests are unanswered
    /// instead of ending it when the run goes idle
    pub block_on_pending_request: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            block_on_pending_request: true,
        }
    }
}

/// One slot in the run's event buffer
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    /// A public event
    Event(WorkflowEvent),
    /// Internal halt request: the run is idle; `pending_requests` tells
    /// watchers whether input could still arrive
    RequestHalt { pending_requests: bool },
}

#[derive(Default)]
struct ChannelInner {
    buffer: VecDeque<StreamItem>,
    closed: bool,
}

/// Buffered, single-consumer event channel for one run
///
/// Emission never blocks; items accumulate until the watcher drains them.
/// The watcher slot is claimed with a compare-and-set so a second
/// concurrent watcher fails fast instead of splitting the sequence.
#[derive(Default)]
pub(crate) struct EventChannel {
    inner: Mutex<ChannelInner>,
    notify: Notify,
    watcher_active: AtomicBool,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a public event
    pub fn emit(&self, event: WorkflowEvent) {
        self.push(StreamItem::Event(event));
    }

    /// Append the internal halt-request marker
    pub fn emit_request_halt(&self, pending_requests: bool) {
        self.push(StreamItem::RequestHalt { pending_requests });
    }

    fn push(&self, item: StreamItem) {
        let mut inner = self.inner.lock().expect("event channel lock poisoned");
        if inner.closed {
            return;
        }
        inner.buffer.push_back(item);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Close the channel; buffered items remain drainable
    pub fn close(&self) {
        self.inner
            .lock()
            .expect("event channel lock poisoned")
            .closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("event channel lock poisoned").closed
    }

    /// Reopen a closed channel (restoring a halted run revives its stream)
    pub fn reopen(&self) {
        self.inner
            .lock()
            .expect("event channel lock poisoned")
            .closed = false;
    }

    /// Drop all buffered items (checkpoint restore discards stale events)
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("event channel lock poisoned")
            .buffer
            .clear();
    }

    /// Claim the single watcher slot; false if already claimed
    pub fn try_claim_watcher(&self) -> bool {
        self.watcher_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the watcher slot
    pub fn release_watcher(&self) {
        self.watcher_active.store(false, Ordering::Release);
    }

    /// Pop the next buffered item without waiting
    pub fn try_next(&self) -> Option<StreamItem> {
        self.inner
            .lock()
            .expect("event channel lock poisoned")
            .buffer
            .pop_front()
    }

    /// Wait for the next item; `None` once the channel is closed and empty
    pub async fn next(&self) -> Option<StreamItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the buffer, or a notification
            // landing between the check and the await is lost.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().expect("event channel lock poisoned");
                if let Some(item) = inner.buffer.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_drain_in_emission_order() {
        let channel = EventChannel::new();
        channel.emit(WorkflowEvent::StepStarted { step: 1 });
        channel.emit(WorkflowEvent::ExecutorInvoked {
            executor_id: "guesser".to_string(),
        });
        channel.close();

        let mut seen = Vec::new();
        while let Some(StreamItem::Event(event)) = channel.next().await {
            seen.push(event);
        }
        assert_eq!(seen[0], WorkflowEvent::StepStarted { step: 1 });
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_next_returns_none_after_close() {
        let channel = EventChannel::new();
        channel.close();
        assert!(channel.next().await.is_none());
    }

    #[test]
    fn test_watcher_slot_is_exclusive() {
        let channel = EventChannel::new();
        assert!(channel.try_claim_watcher());
        assert!(!channel.try_claim_watcher());

        channel.release_watcher();
        assert!(channel.try_claim_watcher());
    }

    #[test]
    fn test_clear_discards_buffered_events() {
        let channel = EventChannel::new();
        channel.emit(WorkflowEvent::AgentUpdate {
            executor_id: "e".to_string(),
            payload: json!({"stale": true}),
        });
        channel.clear();
        assert!(channel.try_next().is_none());
    }

    #[test]
    fn test_emit_after_close_is_dropped() {
        let channel = EventChannel::new();
        channel.close();
        channel.emit(WorkflowEvent::StepStarted { step: 1 });
        assert!(channel.try_next().is_none());
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = WorkflowEvent::SuperStepCompleted {
            step: 3,
            has_actions: false,
            has_requests: true,
            checkpoint_id: Some("cp-1".to_string()),
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: WorkflowEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }
}
