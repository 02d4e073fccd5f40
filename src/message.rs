//! # Message Traits and Type Identity
//!
//! This module defines the fundamental [`Message`] trait every published
//! value must implement, the [`MessageType`] identity used for routing, and
//! the [`DeadMessage`] wrapper delivered when a publication matches nothing.
//!
//! ## Super-type matching
//!
//! Rust has no runtime class hierarchy, so a message type opts into
//! super-type delivery by declaring its parents explicitly, together with a
//! projection that turns a borrow of the child into a borrow of the parent:
//!
//! ```
//! use typebus::{Message, SupertypeSet};
//!
//! #[derive(Debug)]
//! struct Metric { name: &'static str }
//! impl Message for Metric {}
//!
//! #[derive(Debug)]
//! struct LatencyMetric { metric: Metric, micros: u64 }
//!
//! impl Message for LatencyMetric {
//!     fn parents(set: &mut SupertypeSet<Self>) {
//!         set.add(|m: &LatencyMetric| &m.metric);
//!     }
//! }
//! # let _ = LatencyMetric { metric: Metric { name: "publish" }, micros: 12 };
//! ```
//!
//! Handlers declared for `Metric` with sub-type acceptance then receive
//! `LatencyMetric` publications (projected to the embedded `Metric`) when
//! the bus runs in a super-type matching mode.

use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

/// Core trait implemented by every publishable value.
///
/// A message only needs `Debug` (for error reports and logs) plus the usual
/// thread-safety bounds; implementing the trait is a one-liner for most
/// types:
///
/// ```
/// #[derive(Debug)]
/// struct CacheFlushed { entries: usize }
/// impl typebus::Message for CacheFlushed {}
/// ```
///
/// Override [`Message::parents`] to participate in super-type matching.
pub trait Message: Any + Send + Sync + Debug {
    /// Stable name of this message type, used in logs and error reports.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Declares the super-types of this message type.
    ///
    /// The default declares none, which keeps the type out of the
    /// super-type matcher entirely.
    fn parents(_set: &mut SupertypeSet<Self>)
    where
        Self: Sized,
    {
    }
}

/// Shared handle to a published message.
pub type MessageRef = Arc<dyn Message>;

/// Runtime identity of a message type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Identity of the concrete type `M`.
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Returns the [`TypeId`] of the concrete value behind a message object.
pub(crate) fn runtime_type(message: &dyn Message) -> TypeId {
    let any: &dyn Any = message;
    any.type_id()
}

/// Borrow the concrete type behind a message object, if it matches.
pub(crate) fn message_downcast<M: Message>(message: &dyn Message) -> Option<&M> {
    let any: &dyn Any = message;
    any.downcast_ref::<M>()
}

/// Projection from a concrete message to one of its declared super-types.
///
/// Returns `None` when applied to a value of an unexpected concrete type;
/// the matcher skips such deliveries instead of panicking.
pub(crate) type Projection =
    Arc<dyn for<'a> Fn(&'a dyn Message) -> Option<&'a dyn Message> + Send + Sync>;

pub(crate) fn new_projection<F>(project: F) -> Projection
where
    F: for<'a> Fn(&'a dyn Message) -> Option<&'a dyn Message> + Send + Sync + 'static,
{
    Arc::new(project)
}

pub(crate) fn compose_projections(first: Projection, second: Projection) -> Projection {
    new_projection(move |message| first(message).and_then(|mid| second(mid)))
}

/// One declared super-type edge: the parent's identity, the projection into
/// it, and a hook to expand the parent's own declared edges.
pub(crate) struct SuperEdge {
    pub(crate) ty: MessageType,
    pub(crate) project: Projection,
    pub(crate) expand: fn() -> Vec<SuperEdge>,
}

/// Collects the super-type declarations of one message type.
///
/// Passed to [`Message::parents`]; each [`add`](SupertypeSet::add) call
/// registers one direct parent in declaration order.
pub struct SupertypeSet<M: ?Sized> {
    edges: Vec<SuperEdge>,
    _marker: PhantomData<fn(&M)>,
}

impl<M: Message> SupertypeSet<M> {
    pub(crate) fn new() -> Self {
        Self {
            edges: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Registers `P` as a direct super-type of `M`.
    ///
    /// `cast` projects a borrow of the child onto its embedded parent
    /// representation, e.g. `|m: &LatencyMetric| &m.metric`.
    pub fn add<P: Message>(&mut self, cast: fn(&M) -> &P) {
        let project = new_projection(move |message: &dyn Message| {
            message_downcast::<M>(message).map(|m| cast(m) as &dyn Message)
        });
        self.edges.push(SuperEdge {
            ty: MessageType::of::<P>(),
            project,
            expand: collect_edges::<P>,
        });
    }

    pub(crate) fn into_edges(self) -> Vec<SuperEdge> {
        self.edges
    }
}

/// Runs `M::parents` and returns the declared direct edges.
pub(crate) fn collect_edges<M: Message>() -> Vec<SuperEdge> {
    let mut set = SupertypeSet::<M>::new();
    M::parents(&mut set);
    set.into_edges()
}

/// Wrapper re-published when a message matches no subscription.
///
/// Carries the original tuple so diagnostic listeners can inspect what went
/// undelivered. A dead-message publication that itself matches nothing
/// completes silently.
#[derive(Debug, Clone)]
pub struct DeadMessage {
    messages: SmallVec<[MessageRef; 3]>,
}

impl DeadMessage {
    pub(crate) fn new(messages: &[MessageRef]) -> Self {
        Self {
            messages: messages.iter().cloned().collect(),
        }
    }

    /// The original, undelivered message tuple.
    pub fn messages(&self) -> &[MessageRef] {
        &self.messages
    }
}

impl Message for DeadMessage {}

macro_rules! impl_message_for {
    ($($ty:ty),* $(,)?) => {
        $(impl Message for $ty {})*
    };
}

impl_message_for!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
    &'static str,
);
