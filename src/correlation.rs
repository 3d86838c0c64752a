//! Correlation table - outstanding queries awaiting a reply.
//!
//! Each entry maps a query ID to a one-shot [`ReplyHandler`]. An entry is
//! removed the moment it is taken for invocation, so at most one reply is
//! ever delivered per query, whatever the callback does.
//!
//! Entries that never receive a reply are kept until an optional TTL sweep
//! ([`CorrelationTable::evict_expired`]) removes them.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::envelope::QueryId;
use crate::handler::ReplyHandler;

struct PendingReply {
    callback: Box<dyn ReplyHandler>,
    registered_at: Instant,
}

/// Outstanding reply callbacks keyed by query ID.
#[derive(Default)]
pub struct CorrelationTable {
    pending: HashMap<QueryId, PendingReply>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `query_id`.
    ///
    /// Registering the same ID twice keeps the first callback.
    pub fn register(&mut self, query_id: QueryId, callback: Box<dyn ReplyHandler>) {
        self.pending.entry(query_id).or_insert_with(|| PendingReply {
            callback,
            registered_at: Instant::now(),
        });
    }

    /// Remove and return the callback for `query_id`.
    pub fn take(&mut self, query_id: &QueryId) -> Option<Box<dyn ReplyHandler>> {
        self.pending.remove(query_id).map(|entry| entry.callback)
    }

    /// Check whether a reply is still awaited for `query_id`.
    pub fn contains(&self, query_id: &QueryId) -> bool {
        self.pending.contains_key(query_id)
    }

    /// Drop entries registered more than `ttl` ago.
    ///
    /// Returns the evicted query IDs.
    pub fn evict_expired(&mut self, ttl: Duration) -> Vec<QueryId> {
        let now = Instant::now();
        let expired: Vec<QueryId> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.registered_at) >= ttl)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    /// Number of outstanding queries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no reply is awaited.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
