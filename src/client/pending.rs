use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::CorrelationId;

/// In-flight news requests waiting for their reply.
///
/// Maps correlation ids to oneshot channels. The receive loop completes an
/// entry when a reply arrives; the requester removes it when its deadline
/// fires first.
pub(super) struct PendingRequests {
    // ---
    requests: HashMap<CorrelationId, oneshot::Sender<Bytes>>,
}

impl PendingRequests {
    // ---
    pub(super) fn new() -> Self {
        // ---
        Self {
            requests: HashMap::new(),
        }
    }

    /// Register a request; the receiver resolves with the reply payload.
    pub(super) fn register(&mut self, correlation_id: CorrelationId) -> oneshot::Receiver<Bytes> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.requests.insert(correlation_id, tx);
        rx
    }

    /// Deliver a reply payload.
    ///
    /// Returns false if no request with this id is waiting (already timed
    /// out, or a reply meant for someone else).
    pub(super) fn complete(&mut self, correlation_id: &CorrelationId, reply: Bytes) -> bool {
        // ---
        match self.requests.remove(correlation_id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Forget a request without delivering anything.
    pub(super) fn remove(&mut self, correlation_id: &CorrelationId) -> bool {
        // ---
        self.requests.remove(correlation_id).is_some()
    }

    /// Drop every waiting sender; their receivers observe a closed channel.
    pub(super) fn fail_all(&mut self) -> usize {
        // ---
        let count = self.requests.len();
        self.requests.clear();
        count
    }

    pub(super) fn len(&self) -> usize {
        self.requests.len()
    }
}
