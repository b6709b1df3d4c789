//! Per-superstep inboxes
//!
//! A [`StepInbox`] maps recipient executor ids to FIFO queues of delivered
//! envelopes. The scheduler owns two: the inbox being drained this step
//! and the inbox accumulating emissions for the next step; they swap at
//! the step boundary.

use crate::message::Envelope;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use weft_checkpoint::MessageRecord;

/// Recipient-keyed FIFO queues for one superstep
///
/// Interior mutability: handlers enqueue concurrently from delivery tasks
/// while the scheduler holds the inbox by reference.
#[derive(Debug, Default)]
pub struct StepInbox {
    queues: Mutex<HashMap<String, VecDeque<Envelope>>>,
}

impl StepInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope to a recipient's queue
    pub fn enqueue(&self, recipient: &str, envelope: Envelope) {
        self.queues
            .lock()
            .expect("inbox lock poisoned")
            .entry(recipient.to_string())
            .or_default()
            .push_back(envelope);
    }

    /// Whether any recipient has queued messages
    pub fn has_messages(&self) -> bool {
        self.queues
            .lock()
            .expect("inbox lock poisoned")
            .values()
            .any(|q| !q.is_empty())
    }

    /// Take the entire contents, leaving the inbox empty
    pub fn drain(&self) -> HashMap<String, VecDeque<Envelope>> {
        let mut queues = self.queues.lock().expect("inbox lock poisoned");
        let mut drained = std::mem::take(&mut *queues);
        drained.retain(|_, q| !q.is_empty());
        drained
    }

    /// Discard everything queued
    pub fn clear(&self) {
        self.queues.lock().expect("inbox lock poisoned").clear();
    }

    /// Serialized form for checkpointing, recipients in stable order
    pub fn export(&self) -> BTreeMap<String, Vec<MessageRecord>> {
        self.queues
            .lock()
            .expect("inbox lock poisoned")
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(recipient, q)| {
                (
                    recipient.clone(),
                    q.iter().map(Envelope::to_record).collect(),
                )
            })
            .collect()
    }

    /// Replace contents from a checkpoint record
    pub fn import(&self, record: BTreeMap<String, Vec<MessageRecord>>) {
        let mut queues = self.queues.lock().expect("inbox lock poisoned");
        queues.clear();
        for (recipient, messages) in record {
            queues.insert(
                recipient,
                messages.into_iter().map(Envelope::from_record).collect(),
            );
        }
    }
}
