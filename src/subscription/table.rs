//! Subscription table.
//!
//! Maps message-type signatures to subscription arrays. Writers (subscribe,
//! unsubscribe) are serialized by a single bus-wide lock; publication never
//! takes it. Readers observe consistent snapshots because every bucket
//! value is an immutable `Arc<[Arc<Subscription>]>` that is replaced, never
//! mutated, and subscription arrays only ever grow.
//!
//! Subscriptions are created on the first subscribe of their listener type
//! and are kept for the life of the bus: unsubscribing empties their
//! listener lists, a later re-subscribe refills them.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::error::ErrorSink;
use crate::hierarchy::{SuperType, TypeGraph};
use crate::listener::{Listener, MetadataCache};
use crate::message::{Message, Projection};
use crate::stats::StatCounters;
use crate::subscription::{handle_for, Subscription};

pub(crate) type SubscriptionList = Arc<[Arc<Subscription>]>;

/// Full parameter-type sequence of a multi-arity handler, in document
/// order. The flattened form of a signature trie: one key per leaf.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct Signature(pub(crate) SmallVec<[TypeId; 4]>);

/// One arity-1 super-type match: the subscription plus the projection from
/// the concrete published type into the handler's declared parameter type.
pub(crate) struct SuperMatch {
    pub(crate) subscription: Arc<Subscription>,
    pub(crate) project: Projection,
}

pub(crate) struct SubscriptionTable {
    /// Arity-1 scalar handlers, keyed by their exact parameter type.
    single: DashMap<TypeId, SubscriptionList>,
    /// Arity ≥ 2 handlers, keyed by the full parameter sequence.
    multi: DashMap<Signature, SubscriptionList>,
    /// Variadic handlers, keyed by their sequence element type.
    sequences: DashMap<TypeId, SubscriptionList>,
    /// Listener types known to declare no handlers.
    non_listeners: DashMap<TypeId, ()>,
    /// Subscriptions per listener type; used by subscribe/unsubscribe only.
    subs_by_listener: DashMap<TypeId, SubscriptionList>,
    /// Once any variadic handler exists, publications start consulting the
    /// variadic matcher. Monotonic.
    var_arg_possible: AtomicBool,
    /// The single-writer lock over all table mutation.
    write_lock: Mutex<()>,
    metadata: MetadataCache,
    graph: TypeGraph,
    stats: Arc<StatCounters>,
}

impl SubscriptionTable {
    pub(crate) fn new(stats: Arc<StatCounters>) -> Self {
        Self {
            single: DashMap::new(),
            multi: DashMap::new(),
            sequences: DashMap::new(),
            non_listeners: DashMap::new(),
            subs_by_listener: DashMap::new(),
            var_arg_possible: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            metadata: MetadataCache::new(),
            graph: TypeGraph::new(),
            stats,
        }
    }

    /// Registers a listener instance with every subscription of its type,
    /// creating the subscriptions on first contact.
    pub(crate) fn subscribe<L: Listener>(&self, listener: &Arc<L>, sink: &ErrorSink) {
        let listener_id = TypeId::of::<L>();
        let erased: Arc<crate::handler::ListenerObj> = listener.clone();
        let handle = handle_for(&erased);

        let _write = self.write_lock.lock();

        if self.non_listeners.contains_key(&listener_id) {
            return;
        }

        if let Some(existing) = self.subs_by_listener.get(&listener_id) {
            let subscriptions = existing.value().clone();
            drop(existing);
            for subscription in subscriptions.iter() {
                subscription.add_listener(handle.clone());
            }
            return;
        }

        let descriptors = self.metadata.describe::<L>(sink);
        if descriptors.is_empty() {
            self.non_listeners.insert(listener_id, ());
            debug!(
                listener = std::any::type_name::<L>(),
                "no enabled handlers; recorded as non-listener"
            );
            return;
        }

        let created: SubscriptionList = descriptors
            .iter()
            .map(|descriptor| {
                Arc::new(Subscription::new(
                    std::any::type_name::<L>(),
                    descriptor.clone(),
                ))
            })
            .collect::<Vec<_>>()
            .into();

        // activate for subscribe/unsubscribe before exposing to publishers
        self.subs_by_listener.insert(listener_id, created.clone());
        self.stats
            .subscriptions
            .fetch_add(created.len(), Ordering::Relaxed);
        self.stats.listener_types.fetch_add(1, Ordering::Relaxed);

        for subscription in created.iter() {
            subscription.add_listener(handle.clone());

            let descriptor = subscription.descriptor();
            if let Some(element) = descriptor.variadic() {
                self.var_arg_possible.store(true, Ordering::Release);
                append(&self.sequences, element.id(), subscription);
            } else if descriptor.arity() == 1 {
                append(&self.single, descriptor.params()[0].id(), subscription);
            } else {
                let signature =
                    Signature(descriptor.params().iter().map(|p| p.id()).collect());
                append(&self.multi, signature, subscription);
            }
        }

        info!(
            listener = std::any::type_name::<L>(),
            handlers = created.len(),
            "📝 registered subscriptions"
        );
    }

    /// Removes a listener instance from every subscription of its type.
    /// Unknown listeners are tolerated.
    pub(crate) fn unsubscribe<L: Listener>(&self, listener: &Arc<L>) {
        let listener_id = TypeId::of::<L>();
        let identity = Arc::as_ptr(listener) as *const () as usize;

        let _write = self.write_lock.lock();

        if self.non_listeners.contains_key(&listener_id) {
            return;
        }
        if let Some(existing) = self.subs_by_listener.get(&listener_id) {
            let subscriptions = existing.value().clone();
            drop(existing);
            for subscription in subscriptions.iter() {
                subscription.remove_listener(identity);
            }
        }
    }

    /// Computes (and caches) the super-type sequence of `M` so publishes of
    /// erased values, e.g. from async envelopes, can resolve it later.
    pub(crate) fn ensure_hierarchy<M: Message>(&self) {
        self.graph.ensure::<M>();
    }

    pub(crate) fn hierarchy_of(&self, message_id: TypeId) -> Option<Arc<[SuperType]>> {
        self.graph.supers(message_id)
    }

    pub(crate) fn exact_single(&self, message_id: TypeId) -> Option<SubscriptionList> {
        self.single.get(&message_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn exact_multi(&self, signature: &Signature) -> Option<SubscriptionList> {
        self.multi.get(signature).map(|entry| entry.value().clone())
    }

    pub(crate) fn var_args(&self, element_id: TypeId) -> Option<SubscriptionList> {
        if !self.var_arg_possible() {
            return None;
        }
        self.sequences.get(&element_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn var_arg_possible(&self) -> bool {
        self.var_arg_possible.load(Ordering::Acquire)
    }

    /// Arity-1 super-type matches for a concrete published type, computed
    /// on demand from the current table snapshot.
    ///
    /// Order follows the declared super-type sequence; a subscription never
    /// appears twice because it lives under exactly one parameter type.
    pub(crate) fn super_single(&self, message_id: TypeId) -> Vec<SuperMatch> {
        let supers = match self.graph.supers(message_id) {
            Some(supers) => supers,
            None => return Vec::new(),
        };
        let mut matches = Vec::new();
        for parent in supers.iter() {
            if let Some(subscriptions) = self.exact_single(parent.ty.id()) {
                for subscription in subscriptions.iter() {
                    if subscription.descriptor().accepts_subtypes() {
                        matches.push(SuperMatch {
                            subscription: subscription.clone(),
                            project: parent.project.clone(),
                        });
                    }
                }
            }
        }
        matches
    }
}

/// Copy-on-write append: the bucket array is re-allocated one longer and
/// atomically replaces the previous snapshot. Only called under the write
/// lock.
fn append<K: Eq + std::hash::Hash>(
    map: &DashMap<K, SubscriptionList>,
    key: K,
    subscription: &Arc<Subscription>,
) {
    let current = map.get(&key).map(|entry| entry.value().clone());
    let mut next: Vec<Arc<Subscription>> = match current {
        Some(list) => list.iter().cloned().collect(),
        None => Vec::with_capacity(1),
    };
    next.push(subscription.clone());
    map.insert(key, next.into());
}
