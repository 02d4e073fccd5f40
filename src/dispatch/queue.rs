//! Async dispatch queue.
//!
//! Bounded multi-producer/multi-consumer channel carrying message
//! envelopes from `publish_*_async` callers to the dispatcher pool.
//! `transfer` blocks while the queue is full; it never drops. Closing the
//! queue (shutdown) makes `transfer` fail and `take` return `None` once
//! the buffer is drained.
//!
//! FIFO is preserved per producer; ordering across producers is
//! unspecified. Consumers are symmetric: whichever worker wins the receive
//! race takes the envelope.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use crate::error::BusError;
use crate::message::MessageRef;
use crate::subscription::PublishKind;

/// One queued publication: up to three inline scalar slots plus the array
/// variant.
#[derive(Debug)]
pub(crate) enum DispatchEnvelope {
    One(MessageRef),
    Two(MessageRef, MessageRef),
    Three(MessageRef, MessageRef, MessageRef),
    Many(Box<[MessageRef]>),
}

impl DispatchEnvelope {
    pub(crate) fn into_parts(self) -> (SmallVec<[MessageRef; 3]>, PublishKind) {
        match self {
            DispatchEnvelope::One(a) => (smallvec![a], PublishKind::Scalar),
            DispatchEnvelope::Two(a, b) => (smallvec![a, b], PublishKind::Scalar),
            DispatchEnvelope::Three(a, b, c) => (smallvec![a, b, c], PublishKind::Scalar),
            DispatchEnvelope::Many(items) => (items.into_vec().into(), PublishKind::Array),
        }
    }
}

pub(crate) struct DispatchQueue {
    sender: RwLock<Option<Sender<DispatchEnvelope>>>,
    receiver: Receiver<DispatchEnvelope>,
    capacity: usize,
}

impl DispatchQueue {
    /// Creates a queue whose capacity is `capacity` rounded up to a power
    /// of two.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let (sender, receiver) = bounded(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an envelope, blocking while the queue is full.
    pub(crate) fn transfer(&self, envelope: DispatchEnvelope) -> Result<(), BusError> {
        let sender = self.sender.read().clone();
        match sender {
            Some(sender) => sender
                .send(envelope)
                .map_err(|_| BusError::Queue("dispatch queue is closed".into())),
            None => Err(BusError::Queue("bus has shut down".into())),
        }
    }

    /// Blocks until an envelope is available. Returns `None` once the
    /// queue is closed and drained, which is a worker's exit signal.
    pub(crate) fn take(&self) -> Option<DispatchEnvelope> {
        self.receiver.recv().ok()
    }

    /// Advisory snapshot; never authoritative under concurrency.
    pub(crate) fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Closes the queue: pending transfers fail, workers drain and exit.
    pub(crate) fn close(&self) {
        *self.sender.write() = None;
    }
}
