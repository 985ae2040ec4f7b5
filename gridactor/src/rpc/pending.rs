//! Pending request bookkeeping.
//!
//! The router registers every outbound call here before the request leaves,
//! and exactly one of the response handler or the timeout sweep takes it
//! back out. Taking is the only way to complete an entry, so a request can
//! never complete twice.

use crate::actor::mailbox::{deliver_completion, Continuation, Envelope};
use crate::actor::message::ReplyResult;
use crate::actor::{ActorId, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const ID_MODULUS: u64 = i32::MAX as u64;

/// Process-wide request id generator.
///
/// Ids wrap at `2^31 - 1` and skip zero.
#[derive(Debug)]
pub struct RequestIds {
    counter: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Generator whose next id follows `last`.
    pub fn starting_at(last: u32) -> Self {
        Self {
            counter: AtomicU64::new(last as u64),
        }
    }

    pub fn next(&self) -> RequestId {
        loop {
            let prev = self.counter.load(Ordering::Relaxed);
            let next = (prev + 1) % ID_MODULUS;
            if self
                .counter
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
                && next != 0
            {
                return RequestId(next as u32);
            }
        }
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// How a pending request is completed.
pub(crate) enum Completion {
    /// A caller blocked on the reply.
    Waiter(oneshot::Sender<ReplyResult>),
    /// A continuation to run inside the calling actor's mailbox.
    Callback {
        mailbox: mpsc::Sender<Envelope>,
        continuation: Continuation,
    },
}

/// An outstanding call.
pub(crate) struct PendingRequest {
    pub(crate) id: RequestId,
    pub(crate) from: Option<ActorId>,
    pub(crate) to: ActorId,
    pub(crate) deadline: Instant,
    pub(crate) completion: Completion,
}

impl PendingRequest {
    pub(crate) fn new(
        id: RequestId,
        from: Option<ActorId>,
        to: ActorId,
        timeout: Duration,
        completion: Completion,
    ) -> Self {
        Self {
            id,
            from,
            to,
            deadline: Instant::now() + timeout,
            completion,
        }
    }

    /// Deliver the result.
    ///
    /// Callbacks are handed to a separate task so a full caller mailbox
    /// never stalls the router.
    pub(crate) fn complete(self, result: ReplyResult) {
        match self.completion {
            Completion::Waiter(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!(req_id = %self.id, to = %self.to, "caller gone before reply");
                }
            }
            Completion::Callback {
                mailbox,
                continuation,
            } => {
                let id = self.id;
                let from = self.from;
                tokio::spawn(async move {
                    if !deliver_completion(&mailbox, continuation, result).await {
                        tracing::debug!(req_id = %id, from = ?from, "calling actor gone before async reply");
                    }
                });
            }
        }
    }
}

/// Outstanding calls keyed by request id.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, request: PendingRequest) {
        if let Some(stale) = self.entries.insert(request.id, request) {
            // Only possible after the id space wrapped around.
            tracing::warn!(req_id = %stale.id, "request id reused while pending");
            stale.complete(Err(crate::error::ActorError::RpcTimeout));
        }
    }

    pub(crate) fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Remove every entry whose deadline has passed.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<PendingRequest> {
        let expired: Vec<RequestId> = self
            .entries
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    /// Remove every entry.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, request)| request).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
