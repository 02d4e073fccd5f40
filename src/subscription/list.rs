//! Weak listener list.
//!
//! Intrusive singly-linked list of weak listener handles. The head and the
//! per-node `next` links are published through short reader/writer locks;
//! every structural mutation (insertion, identity removal, orphan
//! unlinking) happens while the owning subscription holds its write lock,
//! so there is exactly one structural writer at a time.
//!
//! A traversal that runs concurrently with a removal keeps working: a
//! detached node still points into the live remainder of the list and is
//! never re-linked anywhere else.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::handler::ListenerObj;

/// Weak handle to a subscribed listener instance plus its identity (the
/// address of the listener allocation).
#[derive(Clone)]
pub(crate) struct ListenerHandle {
    pub(crate) weak: Weak<ListenerObj>,
    pub(crate) identity: usize,
}

pub(crate) struct ListenerNode {
    handle: ListenerHandle,
    /// Serializes handler invocations for this listener when the handler
    /// was declared synchronized.
    guard: Option<Mutex<()>>,
    next: RwLock<Option<Arc<ListenerNode>>>,
}

impl ListenerNode {
    pub(crate) fn next(&self) -> Option<Arc<ListenerNode>> {
        self.next.read().clone()
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<ListenerObj>> {
        self.handle.weak.upgrade()
    }

    pub(crate) fn identity(&self) -> usize {
        self.handle.identity
    }

    pub(crate) fn guard(&self) -> Option<&Mutex<()>> {
        self.guard.as_ref()
    }
}

pub(crate) struct ListenerList {
    head: RwLock<Option<Arc<ListenerNode>>>,
}

impl ListenerList {
    pub(crate) fn new() -> Self {
        Self {
            head: RwLock::new(None),
        }
    }

    pub(crate) fn head(&self) -> Option<Arc<ListenerNode>> {
        self.head.read().clone()
    }

    /// Inserts a new entry at the head. Caller holds the subscription
    /// write lock.
    pub(crate) fn push_front(&self, handle: ListenerHandle, synchronized: bool) {
        let node = Arc::new(ListenerNode {
            handle,
            guard: synchronized.then(|| Mutex::new(())),
            next: RwLock::new(self.head()),
        });
        *self.head.write() = Some(node);
    }

    /// Whether a live entry with this identity is present.
    pub(crate) fn contains(&self, identity: usize) -> bool {
        let mut cursor = self.head();
        while let Some(node) = cursor {
            if node.identity() == identity && node.handle.weak.strong_count() > 0 {
                return true;
            }
            cursor = node.next();
        }
        false
    }

    /// Unlinks the first live entry with this identity. Caller holds the
    /// subscription write lock.
    pub(crate) fn remove(&self, identity: usize) -> bool {
        self.unlink_first(|node| {
            node.identity() == identity && node.handle.weak.strong_count() > 0
        })
    }

    /// Unlinks one specific node (orphan reclamation). Caller holds the
    /// subscription write lock.
    pub(crate) fn unlink(&self, target: &Arc<ListenerNode>) -> bool {
        self.unlink_first(|node| Arc::ptr_eq(node, target))
    }

    fn unlink_first(&self, matches: impl Fn(&Arc<ListenerNode>) -> bool) -> bool {
        let mut prev: Option<Arc<ListenerNode>> = None;
        let mut cursor = self.head();
        while let Some(node) = cursor {
            if matches(&node) {
                let next = node.next();
                match &prev {
                    None => *self.head.write() = next,
                    Some(p) => *p.next.write() = next,
                }
                return true;
            }
            let following = node.next();
            prev = Some(node);
            cursor = following;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next();
        }
        count
    }
}

pub(crate) fn handle_for(listener: &Arc<ListenerObj>) -> ListenerHandle {
    ListenerHandle {
        weak: Arc::downgrade(listener),
        identity: Arc::as_ptr(listener) as *const () as usize,
    }
}
