//! Mailbox: shared, receiver-addressed store of pending envelopes.
//!
//! Envelopes are indexed per receiver, so `receive` is O(1) amortized while
//! still returning, for each receiver, the earliest-sent envelope first.
//! Delivery is at-most-once: a received envelope is removed and never
//! placed back.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::envelope::{Envelope, StageId};

/// In-memory mailbox shared by all stages of one run.
pub struct Mailbox {
    queues: Mutex<HashMap<StageId, VecDeque<Envelope>>>,
}

impl Mailbox {
    /// Create a new, empty mailbox.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
        })
    }

    /// Append an envelope to its receiver's queue.
    pub async fn send(&self, envelope: Envelope) {
        info!(
            sender = %envelope.sender(),
            receiver = %envelope.receiver(),
            kind = %envelope.kind(),
            topic = envelope.topic(),
            "{} -> {}: {}",
            envelope.sender(),
            envelope.receiver(),
            envelope.kind()
        );

        let mut queues = self.queues.lock().await;
        queues
            .entry(envelope.receiver().clone())
            .or_default()
            .push_back(envelope);
    }

    /// Remove and return the earliest pending envelope addressed to `receiver`.
    pub async fn receive(&self, receiver: &StageId) -> Option<Envelope> {
        let mut queues = self.queues.lock().await;
        let queue = queues.get_mut(receiver)?;
        let envelope = queue.pop_front();
        if queue.is_empty() {
            queues.remove(receiver);
        }
        if let Some(ref env) = envelope {
            debug!(receiver = %receiver, kind = %env.kind(), id = %env.id(), "Envelope delivered");
        }
        envelope
    }

    /// Number of envelopes waiting for `receiver`.
    pub async fn pending_for(&self, receiver: &StageId) -> usize {
        self.queues
            .lock()
            .await
            .get(receiver)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Total number of pending envelopes.
    pub async fn len(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.lock().await.is_empty()
    }
}
