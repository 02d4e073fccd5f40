//! # Listener Declaration and Handler Discovery
//!
//! A type becomes a listener by implementing [`Listener`] and enumerating
//! its handlers in [`Listener::handlers`]. The enumeration plays the role a
//! handler-marker annotation plays in reflective environments: each
//! declaration carries the options `enabled` (default `true`),
//! `accept_subtypes` (default `true`) and `synchronized` (default
//! `false`).
//!
//! ```
//! use typebus::{HandlerResult, HandlerSet, Listener};
//!
//! struct Auditor;
//!
//! impl Auditor {
//!     fn on_amount(&self, amount: &u64) -> HandlerResult {
//!         println!("audited {amount}");
//!         Ok(())
//!     }
//!
//!     fn on_batch(&self, amounts: &[&u64]) -> HandlerResult {
//!         println!("audited batch of {}", amounts.len());
//!         Ok(())
//!     }
//! }
//!
//! impl Listener for Auditor {
//!     fn handlers(set: &mut HandlerSet<Self>) {
//!         set.on(Auditor::on_amount).named("on_amount");
//!         set.on_varargs(Auditor::on_batch);
//!     }
//! }
//! ```
//!
//! Discovery runs the declaration once per listener type and caches the
//! normalized descriptor set; repeat subscriptions of the same type never
//! rescan. There is no inheritance walk: a listener impl enumerates
//! everything the type handles.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{BusError, ErrorSink, HandlerResult, PublicationError};
use crate::handler::{
    spec1, spec2, spec3, spec_varargs, HandlerDescriptor, HandlerSpec,
};
use crate::message::Message;

/// A type whose instances receive messages through declared handlers.
pub trait Listener: Send + Sync + 'static {
    /// Enumerates the handlers of this listener type.
    fn handlers(set: &mut HandlerSet<Self>)
    where
        Self: Sized;
}

/// Collects the handler declarations of one listener type.
pub struct HandlerSet<L: ?Sized> {
    specs: Vec<HandlerSpec>,
    _marker: PhantomData<fn(&L)>,
}

impl<L: Listener> HandlerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            specs: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declares a single-message handler.
    pub fn on<M, F>(&mut self, handler: F) -> &mut HandlerSpec
    where
        M: Message,
        F: Fn(&L, &M) -> HandlerResult + Send + Sync + 'static,
    {
        self.push(spec1::<L, M, F>(handler))
    }

    /// Declares a two-message handler.
    pub fn on2<A, B, F>(&mut self, handler: F) -> &mut HandlerSpec
    where
        A: Message,
        B: Message,
        F: Fn(&L, &A, &B) -> HandlerResult + Send + Sync + 'static,
    {
        self.push(spec2::<L, A, B, F>(handler))
    }

    /// Declares a three-message handler.
    pub fn on3<A, B, C, F>(&mut self, handler: F) -> &mut HandlerSpec
    where
        A: Message,
        B: Message,
        C: Message,
        F: Fn(&L, &A, &B, &C) -> HandlerResult + Send + Sync + 'static,
    {
        self.push(spec3::<L, A, B, C, F>(handler))
    }

    /// Declares a variadic handler: a homogeneous sequence of `M`.
    ///
    /// Matches array publications of `M`, and scalar publications of two or
    /// three `M` values when the bus mode enables variadic matching.
    pub fn on_varargs<M, F>(&mut self, handler: F) -> &mut HandlerSpec
    where
        M: Message,
        F: Fn(&L, &[&M]) -> HandlerResult + Send + Sync + 'static,
    {
        self.push(spec_varargs::<L, M, F>(handler))
    }

    /// Low-level declaration escape hatch; the declaration is validated
    /// at discovery like any other.
    pub fn declare(&mut self, spec: HandlerSpec) -> &mut HandlerSpec {
        self.push(spec)
    }

    fn push(&mut self, spec: HandlerSpec) -> &mut HandlerSpec {
        let idx = self.specs.len();
        self.specs.push(spec);
        &mut self.specs[idx]
    }

    pub(crate) fn into_specs(self) -> Vec<HandlerSpec> {
        self.specs
    }
}

/// Normalized handler descriptors per listener type, produced once and
/// cached.
pub(crate) struct MetadataCache {
    descriptors: DashMap<TypeId, Arc<[Arc<HandlerDescriptor>]>>,
}

impl MetadataCache {
    pub(crate) fn new() -> Self {
        Self {
            descriptors: DashMap::new(),
        }
    }

    /// Runs the declaration of `L` (once) and returns its descriptor set.
    ///
    /// Declarations disabled at source are dropped. A declaration without
    /// message parameters is a configuration error: it is reported through
    /// the sink and dropped, and the listener type is still cached so it is
    /// never scanned again.
    pub(crate) fn describe<L: Listener>(&self, sink: &ErrorSink) -> Arc<[Arc<HandlerDescriptor>]> {
        let listener_id = TypeId::of::<L>();
        if let Some(hit) = self.descriptors.get(&listener_id) {
            return hit.value().clone();
        }

        let mut set = HandlerSet::<L>::new();
        L::handlers(&mut set);

        let listener_name = std::any::type_name::<L>();
        let mut out: Vec<Arc<HandlerDescriptor>> = Vec::new();
        for (idx, spec) in set.into_specs().into_iter().enumerate() {
            if !spec.enabled {
                debug!(listener = listener_name, index = idx, "handler disabled at declaration");
                continue;
            }
            if spec.params.is_empty() {
                let handler = spec
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{listener_name}#{idx}"));
                sink.publish_error(
                    PublicationError::new("invalid handler declaration")
                        .cause(BusError::ZeroArityHandler {
                            listener: listener_name,
                            handler,
                        }),
                );
                continue;
            }
            out.push(Arc::new(HandlerDescriptor::from_spec(
                spec,
                format!("{listener_name}#{idx}"),
            )));
        }

        let out: Arc<[Arc<HandlerDescriptor>]> = out.into();
        self.descriptors
            .entry(listener_id)
            .or_insert(out)
            .value()
            .clone()
    }
}
