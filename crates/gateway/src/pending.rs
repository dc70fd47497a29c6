//! Per-connection table of requests awaiting a reply.
//!
//! Each entry owns the sending half of a oneshot channel. Whoever removes the
//! entry from the map decides its outcome: the dispatch layer fulfills it,
//! the caller's guard discards it on timeout or cancellation, and teardown
//! drops it so the waiting caller sees the connection as lost. Removal is a
//! single atomic map operation, so exactly one of these wins.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use {dashmap::DashMap, serde_json::Value, tokio::sync::oneshot, tracing::debug};

/// A caller waiting for a reply.
#[derive(Debug)]
struct PendingRequest {
    request_type: String,
    created_at: Instant,
    sender: oneshot::Sender<Value>,
}

/// How a request whose deadline passed was actually settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Expired {
    /// Nothing claimed the entry before the deadline.
    TimedOut,
    /// A reply took the entry just before the deadline was acted on.
    Replied(Value),
    /// Teardown took the entry first.
    Lost,
}

/// The table was already torn down when a new entry was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableClosed;

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: DashMap<String, PendingRequest>,
    closed: AtomicBool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry under `id`. The returned guard removes the entry when
    /// dropped, whatever happened to it in the meantime.
    pub fn register(
        &self,
        id: &str,
        request_type: &str,
    ) -> Result<(PendingGuard<'_>, oneshot::Receiver<Value>), TableClosed> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id.to_string(), PendingRequest {
            request_type: request_type.to_string(),
            created_at: Instant::now(),
            sender: tx,
        });
        let guard = PendingGuard {
            table: self,
            id: id.to_string(),
        };
        // fail_all() flips the flag before draining, so an entry inserted
        // before this check is either drained or rejected here.
        if self.closed.load(Ordering::SeqCst) {
            return Err(TableClosed);
        }
        Ok((guard, rx))
    }

    /// Hand `payload` to the caller waiting on `id`. Returns false when no
    /// such entry exists (unknown, already resolved, or abandoned).
    pub fn fulfill(&self, id: &str, payload: Value) -> bool {
        match self.entries.remove(id) {
            Some((_, pending)) => {
                debug!(
                    id,
                    request_type = %pending.request_type,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "reply matched"
                );
                pending.sender.send(payload).is_ok()
            },
            None => false,
        }
    }

    /// Settle `id` once its deadline has passed. The entry goes to whoever
    /// removes it first, so a reply that got there before us still wins.
    pub async fn expire(&self, id: &str, rx: oneshot::Receiver<Value>) -> Expired {
        if self.discard(id) {
            return Expired::TimedOut;
        }
        // The winner has already removed the entry; its send or drop follows
        // immediately.
        match rx.await {
            Ok(reply) => Expired::Replied(reply),
            Err(_) => Expired::Lost,
        }
    }

    /// Drop the entry without resolving it. Idempotent.
    pub fn discard(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Resolve every pending entry as connection-lost and refuse new ones.
    /// Returns how many callers were waiting.
    pub fn fail_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let mut failed = 0;
        self.entries.retain(|id, pending| {
            debug!(
                id = %id,
                request_type = %pending.request_type,
                waited_ms = pending.created_at.elapsed().as_millis() as u64,
                "failing pending request"
            );
            failed += 1;
            false
        });
        failed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Removes its entry from the table on drop.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: String,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.discard(&self.id);
    }
}
