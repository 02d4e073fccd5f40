//! Subscriptions and their runtime tables.
//!
//! A [`Subscription`] binds one handler descriptor to one listener type and
//! owns the weak list of live listener instances. There is exactly one
//! subscription per {listener type, handler} pair for the life of the bus;
//! unsubscribing empties it, re-subscribing refills it.

mod list;
mod matcher;
mod table;

pub(crate) use list::{handle_for, ListenerHandle};
pub(crate) use matcher::{Matcher, PublishKind};
pub(crate) use table::SubscriptionTable;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ErrorSink, HandlerError, PublicationError};
use crate::handler::HandlerDescriptor;
use crate::message::MessageRef;
use list::ListenerList;

pub(crate) struct Subscription {
    listener_name: &'static str,
    descriptor: Arc<HandlerDescriptor>,
    listeners: ListenerList,
    /// Serializes structural mutation of the listener list: subscribe,
    /// unsubscribe, and orphan unlinking during publication.
    write_lock: Mutex<()>,
}

impl Subscription {
    pub(crate) fn new(listener_name: &'static str, descriptor: Arc<HandlerDescriptor>) -> Self {
        Self {
            listener_name,
            descriptor,
            listeners: ListenerList::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub(crate) fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    pub(crate) fn listener_name(&self) -> &'static str {
        self.listener_name
    }

    /// Adds a listener instance. Duplicate insertion of the same instance
    /// is a no-op.
    pub(crate) fn add_listener(&self, handle: ListenerHandle) {
        let _write = self.write_lock.lock();
        if self.listeners.contains(handle.identity) {
            return;
        }
        self.listeners
            .push_front(handle, self.descriptor.is_synchronized());
    }

    /// Removes the listener instance with this identity, if present.
    pub(crate) fn remove_listener(&self, identity: usize) {
        let _write = self.write_lock.lock();
        self.listeners.remove(identity);
    }

    /// Delivers one message tuple to every live listener of this
    /// subscription.
    ///
    /// `args` are the (possibly projected) borrows handed to the handler;
    /// `originals` is the unprojected tuple attached to error reports.
    /// Cleared weak entries found on the way are unlinked under the write
    /// lock. A handler returning [`HandlerError::Cancel`] stops the
    /// traversal of this subscription; any other handler error is captured
    /// and forwarded to the sink, and the traversal continues.
    ///
    /// Returns whether at least one live listener existed.
    pub(crate) fn invoke(
        &self,
        sink: &ErrorSink,
        args: &[&dyn crate::message::Message],
        originals: &[MessageRef],
    ) -> bool {
        let mut alive = false;
        let mut cursor = self.listeners.head();
        while let Some(node) = cursor {
            let next = node.next();
            match node.upgrade() {
                None => {
                    let _write = self.write_lock.lock();
                    self.listeners.unlink(&node);
                }
                Some(listener) => {
                    alive = true;
                    let outcome = match node.guard() {
                        Some(guard) => {
                            let _serialized = guard.lock();
                            (self.descriptor.invoker())(listener.as_ref(), args)
                        }
                        None => (self.descriptor.invoker())(listener.as_ref(), args),
                    };
                    match outcome {
                        Ok(()) => {}
                        Err(HandlerError::Cancel) => return alive,
                        Err(failure) => {
                            sink.publish_error(
                                PublicationError::new("error during publication of message")
                                    .cause(failure)
                                    .published(originals),
                            );
                        }
                    }
                }
            }
            cursor = next;
        }
        alive
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.listener_name)
            .field("handler", &self.descriptor.name())
            .finish()
    }
}
