//! # The Message Bus Façade
//!
//! [`MessageBus`] ties the subscription table, the matcher, the error sink
//! and the async dispatcher together behind the public publish/subscribe
//! surface.
//!
//! Synchronous publications return after every matching handler completed
//! or errored. Asynchronous publications enqueue an envelope and return;
//! they block while the dispatch queue is saturated and never drop. All
//! methods take `&self`; share the bus across threads with `Arc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, info};

use crate::config::{BusConfig, PublishMode};
use crate::dispatch::{DispatchEnvelope, DispatchQueue, DispatcherPool};
use crate::error::{ErrorSink, PublicationError, PublicationErrorHandler};
use crate::listener::Listener;
use crate::message::{Message, MessageRef};
use crate::stats::{BusStats, StatCounters};
use crate::subscription::{Matcher, PublishKind, SubscriptionTable};

/// Shared state behind a [`MessageBus`], also held by the dispatch
/// workers.
pub(crate) struct BusCore {
    table: SubscriptionTable,
    matcher: Matcher,
    sink: ErrorSink,
    queue: DispatchQueue,
    pool: DispatcherPool,
    stats: Arc<StatCounters>,
    shutting_down: AtomicBool,
    started: AtomicBool,
    workers: usize,
}

impl BusCore {
    pub(crate) fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub(crate) fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Synchronous delivery of one dequeued envelope.
    pub(crate) fn publish_envelope(&self, envelope: DispatchEnvelope) {
        let (messages, kind) = envelope.into_parts();
        self.matcher
            .publish(&self.table, &self.sink, &self.stats, &messages, kind);
    }

    fn publish_now(&self, messages: &[MessageRef], kind: PublishKind) {
        self.stats.sync_publications.fetch_add(1, Ordering::Relaxed);
        self.matcher
            .publish(&self.table, &self.sink, &self.stats, messages, kind);
    }

    fn enqueue(&self, envelope: DispatchEnvelope, originals: &[MessageRef]) {
        match self.queue.transfer(envelope) {
            Ok(()) => {
                self.stats
                    .async_publications
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.sink.publish_error(
                    PublicationError::new("error while adding an asynchronous message")
                        .cause(err)
                        .published(originals),
                );
            }
        }
    }
}

/// In-process publish/subscribe message bus with super-type and variadic
/// matching.
///
/// ```
/// use std::sync::Arc;
/// use typebus::{BusConfig, HandlerResult, HandlerSet, Listener, Message, MessageBus};
///
/// #[derive(Debug)]
/// struct OrderPlaced {
///     total_cents: u64,
/// }
/// impl Message for OrderPlaced {}
///
/// #[derive(Default)]
/// struct Billing;
///
/// impl Billing {
///     fn on_order(&self, order: &OrderPlaced) -> HandlerResult {
///         println!("billing {} cents", order.total_cents);
///         Ok(())
///     }
/// }
///
/// impl Listener for Billing {
///     fn handlers(set: &mut HandlerSet<Self>) {
///         set.on(Billing::on_order);
///     }
/// }
///
/// let bus = MessageBus::new(BusConfig::default());
/// let billing = Arc::new(Billing);
/// bus.subscribe(&billing);
/// bus.publish(OrderPlaced { total_cents: 1299 });
/// ```
pub struct MessageBus {
    core: Arc<BusCore>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        let workers = config.effective_workers();
        let stats = Arc::new(StatCounters::default());
        let core = Arc::new(BusCore {
            table: SubscriptionTable::new(stats.clone()),
            matcher: Matcher::new(config.publish_mode),
            sink: ErrorSink::new(stats.clone()),
            queue: DispatchQueue::with_capacity(workers),
            pool: DispatcherPool::new(),
            stats,
            shutting_down: AtomicBool::new(false),
            started: AtomicBool::new(false),
            workers,
        });
        debug!(
            mode = ?core.matcher.mode(),
            workers,
            queue_capacity = core.queue.capacity(),
            "message bus created"
        );
        Self { core }
    }

    /// Registers every handler of the listener's type for this instance.
    /// Subscribing the same instance twice is a no-op.
    pub fn subscribe<L: Listener>(&self, listener: &Arc<L>) {
        self.core.table.subscribe(listener, &self.core.sink);
    }

    /// Removes this instance from every subscription of its type. Unknown
    /// listeners are tolerated.
    pub fn unsubscribe<L: Listener>(&self, listener: &Arc<L>) {
        self.core.table.unsubscribe(listener);
    }

    /// Synchronously publishes one message.
    pub fn publish<M: Message>(&self, message: M) {
        self.core.table.ensure_hierarchy::<M>();
        let messages: SmallVec<[MessageRef; 3]> = smallvec![Arc::new(message) as MessageRef];
        self.core.publish_now(&messages, PublishKind::Scalar);
    }

    /// Synchronously publishes a two-message tuple.
    pub fn publish2<A: Message, B: Message>(&self, first: A, second: B) {
        self.core.table.ensure_hierarchy::<A>();
        self.core.table.ensure_hierarchy::<B>();
        let messages: SmallVec<[MessageRef; 3]> =
            smallvec![Arc::new(first) as MessageRef, Arc::new(second) as MessageRef];
        self.core.publish_now(&messages, PublishKind::Scalar);
    }

    /// Synchronously publishes a three-message tuple.
    pub fn publish3<A: Message, B: Message, C: Message>(&self, first: A, second: B, third: C) {
        self.core.table.ensure_hierarchy::<A>();
        self.core.table.ensure_hierarchy::<B>();
        self.core.table.ensure_hierarchy::<C>();
        let messages: SmallVec<[MessageRef; 3]> = smallvec![
            Arc::new(first) as MessageRef,
            Arc::new(second) as MessageRef,
            Arc::new(third) as MessageRef
        ];
        self.core.publish_now(&messages, PublishKind::Scalar);
    }

    /// Synchronously publishes a homogeneous array of messages.
    pub fn publish_many<M: Message>(&self, messages: Vec<M>) {
        self.core.table.ensure_hierarchy::<M>();
        let messages: SmallVec<[MessageRef; 3]> = messages
            .into_iter()
            .map(|message| Arc::new(message) as MessageRef)
            .collect();
        self.core.publish_now(&messages, PublishKind::Array);
    }

    /// Synchronously publishes an already-erased, possibly heterogeneous
    /// array of messages. This is the only way to reach handlers of arity
    /// four and above whose parameter types differ.
    pub fn publish_dyn(&self, messages: Vec<MessageRef>) {
        let messages: SmallVec<[MessageRef; 3]> = messages.into();
        self.core.publish_now(&messages, PublishKind::Array);
    }

    /// Enqueues an erased, possibly heterogeneous array for asynchronous
    /// delivery.
    pub fn publish_dyn_async(&self, messages: Vec<MessageRef>) {
        self.core.enqueue(
            DispatchEnvelope::Many(messages.clone().into_boxed_slice()),
            &messages,
        );
    }

    /// Enqueues one message for asynchronous delivery. Blocks while the
    /// dispatch queue is full; enqueue failures go to the error sink.
    pub fn publish_async<M: Message>(&self, message: M) {
        self.core.table.ensure_hierarchy::<M>();
        let message: MessageRef = Arc::new(message);
        self.core.enqueue(
            DispatchEnvelope::One(message.clone()),
            std::slice::from_ref(&message),
        );
    }

    /// Enqueues a two-message tuple for asynchronous delivery.
    pub fn publish2_async<A: Message, B: Message>(&self, first: A, second: B) {
        self.core.table.ensure_hierarchy::<A>();
        self.core.table.ensure_hierarchy::<B>();
        let first: MessageRef = Arc::new(first);
        let second: MessageRef = Arc::new(second);
        self.core.enqueue(
            DispatchEnvelope::Two(first.clone(), second.clone()),
            &[first, second],
        );
    }

    /// Enqueues a three-message tuple for asynchronous delivery.
    pub fn publish3_async<A: Message, B: Message, C: Message>(
        &self,
        first: A,
        second: B,
        third: C,
    ) {
        self.core.table.ensure_hierarchy::<A>();
        self.core.table.ensure_hierarchy::<B>();
        self.core.table.ensure_hierarchy::<C>();
        let first: MessageRef = Arc::new(first);
        let second: MessageRef = Arc::new(second);
        let third: MessageRef = Arc::new(third);
        self.core.enqueue(
            DispatchEnvelope::Three(first.clone(), second.clone(), third.clone()),
            &[first, second, third],
        );
    }

    /// Enqueues a homogeneous array for asynchronous delivery.
    pub fn publish_many_async<M: Message>(&self, messages: Vec<M>) {
        self.core.table.ensure_hierarchy::<M>();
        let messages: Vec<MessageRef> = messages
            .into_iter()
            .map(|message| Arc::new(message) as MessageRef)
            .collect();
        self.core.enqueue(
            DispatchEnvelope::Many(messages.clone().into_boxed_slice()),
            &messages,
        );
    }

    /// Advisory: whether envelopes are waiting in the dispatch queue.
    pub fn has_pending_messages(&self) -> bool {
        self.core.queue.has_pending()
    }

    /// Registers a consumer for captured publication errors.
    pub fn add_error_handler(&self, handler: Arc<dyn PublicationErrorHandler>) {
        self.core.sink.add_handler(handler);
    }

    /// Starts the async dispatcher pool. When no error handler was
    /// registered, installs the stderr fallback. Idempotent.
    pub fn start(&self) {
        if self.core.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.core.sink.install_fallback() {
            info!(
                "no publication error handler configured; falling back to stderr \
                 (handlers can be added with add_error_handler)"
            );
        }
        self.core.pool.start(self.core.workers, self.core.clone());
        info!(workers = self.core.workers, "message bus started");
    }

    /// Stops the bus: async publications start failing, workers exit, and
    /// envelopes still queued may be discarded. Idempotent.
    pub fn shutdown(&self) {
        if self.core.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.queue.close();
        self.core.pool.join();
        info!("message bus shut down");
    }

    /// The publish mode this bus resolves matches with.
    pub fn publish_mode(&self) -> PublishMode {
        self.core.matcher.mode()
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> BusStats {
        self.core.stats.snapshot()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("mode", &self.core.matcher.mode())
            .field("workers", &self.core.workers)
            .field("started", &self.core.started.load(Ordering::Relaxed))
            .field(
                "shutting_down",
                &self.core.shutting_down.load(Ordering::Relaxed),
            )
            .finish()
    }
}
