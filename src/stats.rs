/// Statistics tracking for the message bus
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Core bus statistics for monitoring.
///
/// A point-in-time snapshot taken from the bus counters; see
/// [`MessageBus::stats`](crate::MessageBus::stats).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    /// Total number of subscriptions created (one per listener type and handler)
    pub subscriptions: usize,
    /// Number of distinct listener types that declared at least one handler
    pub listener_types: usize,
    /// Total number of synchronous publications since the bus was created
    pub sync_publications: u64,
    /// Total number of envelopes accepted by the async dispatch queue
    pub async_publications: u64,
    /// Publications that matched no subscription and were re-published as dead messages
    pub dead_messages: u64,
    /// Errors routed through the publication error sink
    pub publication_errors: u64,
}

/// Internal atomic counters behind [`BusStats`].
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) subscriptions: AtomicUsize,
    pub(crate) listener_types: AtomicUsize,
    pub(crate) sync_publications: AtomicU64,
    pub(crate) async_publications: AtomicU64,
    pub(crate) dead_messages: AtomicU64,
    pub(crate) publication_errors: AtomicU64,
}

impl StatCounters {
    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            listener_types: self.listener_types.load(Ordering::Relaxed),
            sync_publications: self.sync_publications.load(Ordering::Relaxed),
            async_publications: self.async_publications.load(Ordering::Relaxed),
            dead_messages: self.dead_messages.load(Ordering::Relaxed),
            publication_errors: self.publication_errors.load(Ordering::Relaxed),
        }
    }
}
