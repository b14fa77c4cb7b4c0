//! Pending correlated requests, keyed by message id.

use std::collections::HashMap;
use std::time::Duration;

use homelink_shared::MessageId;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, SessionError};

/// Who is waiting for a result.
pub(crate) enum Responder {
    /// An application caller awaiting the decoded payload.
    Caller(oneshot::Sender<Result<Value>>),
    /// The session's own event subscription.
    Subscription,
}

pub(crate) struct PendingRequest {
    pub id: MessageId,
    pub created_at: Instant,
    pub timeout: Option<Duration>,
    /// Written to the socket (as opposed to waiting in the outbound queue).
    pub sent: bool,
    pub responder: Responder,
}

impl PendingRequest {
    pub fn new(id: MessageId, timeout: Option<Duration>, responder: Responder) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            timeout,
            sent: false,
            responder,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| self.created_at + timeout)
    }

    /// Deliver the outcome. Returns `false` if nobody was listening.
    pub fn complete(self, result: Result<Value>) -> bool {
        match self.responder {
            Responder::Caller(reply) => reply.send(result).is_ok(),
            Responder::Subscription => false,
        }
    }
}

/// Message id -> pending request. Each entry leaves the table exactly once.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<MessageId, PendingRequest>,
}

impl CorrelationTable {
    pub fn register(&mut self, request: PendingRequest) {
        let id = request.id;
        if let Some(previous) = self.entries.insert(id, request) {
            // Ids are never reused, so this means a bookkeeping bug upstream.
            tracing::error!("Correlation id {} registered twice", id);
            previous.complete(Err(SessionError::Protocol(format!(
                "correlation id {} reused",
                id
            ))));
        }
    }

    pub fn take(&mut self, id: MessageId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn mark_sent(&mut self, id: MessageId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.sent = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every request that already went out on the wire, oldest first.
    pub fn drain_sent(&mut self) -> Vec<PendingRequest> {
        self.drain_where(|entry| entry.sent)
    }

    /// Remove every request, oldest first.
    pub fn drain_all(&mut self) -> Vec<PendingRequest> {
        self.drain_where(|_| true)
    }

    /// Remove requests whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest> {
        self.drain_where(|entry| entry.deadline().is_some_and(|deadline| deadline <= now))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().filter_map(PendingRequest::deadline).min()
    }

    fn drain_where(&mut self, pred: impl Fn(&PendingRequest) -> bool) -> Vec<PendingRequest> {
        let mut ids: Vec<MessageId> = self
            .entries
            .values()
            .filter(|entry| pred(entry))
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }
}
