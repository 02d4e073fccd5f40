//! Handler metadata.
//!
//! A handler declaration is normalized into an immutable
//! [`HandlerDescriptor`]: the parameter type sequence, the matching options
//! carried by the declaration, and a type-erased invoker closure that
//! downcasts the published tuple and calls the original typed function.
//!
//! The erased invoker is the only invocation strategy the bus ships: the
//! typed registration methods monomorphize one closure per handler, so no
//! runtime reflection is involved.

use std::any::Any;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::error::{HandlerError, HandlerResult};
use crate::message::{message_downcast, Message, MessageType};

/// Type-erased listener instance as stored by subscriptions.
pub(crate) type ListenerObj = dyn Any + Send + Sync;

/// Type-erased handler invocation: listener instance plus the (possibly
/// projected) message arguments in declaration order.
pub(crate) type Invoker = dyn Fn(&ListenerObj, &[&dyn Message]) -> HandlerResult + Send + Sync;

/// One handler declaration as collected from a listener type, before
/// validation.
///
/// Most declarations come from the typed [`HandlerSet`](crate::HandlerSet)
/// builders; [`HandlerSpec::new`] is the low-level escape hatch for
/// constructing a declaration with an explicit parameter list.
pub struct HandlerSpec {
    pub(crate) name: Option<String>,
    pub(crate) params: SmallVec<[MessageType; 3]>,
    pub(crate) accepts_subtypes: bool,
    pub(crate) variadic: Option<MessageType>,
    pub(crate) enabled: bool,
    pub(crate) synchronized: bool,
    pub(crate) invoker: Arc<Invoker>,
}

impl HandlerSpec {
    /// Low-level declaration with an explicit parameter list and a raw
    /// erased invoker.
    pub fn new(
        params: Vec<MessageType>,
        invoker: impl Fn(&(dyn Any + Send + Sync), &[&dyn Message]) -> HandlerResult
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: None,
            params: params.into_iter().collect(),
            accepts_subtypes: true,
            variadic: None,
            enabled: true,
            synchronized: false,
            invoker: Arc::new(invoker),
        }
    }

    /// Whether this handler also receives strict sub-types of its declared
    /// parameter types (in a super-type matching mode). Defaults to `true`.
    pub fn accept_subtypes(&mut self, accept: bool) -> &mut Self {
        self.accepts_subtypes = accept;
        self
    }

    /// Serializes invocations of this handler per listener instance.
    pub fn synchronized(&mut self) -> &mut Self {
        self.synchronized = true;
        self
    }

    /// Drops this declaration at discovery.
    pub fn disabled(&mut self) -> &mut Self {
        self.enabled = false;
        self
    }

    /// Names the handler for logs and error reports.
    pub fn named(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Normalized, immutable metadata for one handler.
pub struct HandlerDescriptor {
    name: String,
    params: SmallVec<[MessageType; 3]>,
    accepts_subtypes: bool,
    variadic: Option<MessageType>,
    synchronized: bool,
    invoker: Arc<Invoker>,
}

impl HandlerDescriptor {
    pub(crate) fn from_spec(spec: HandlerSpec, fallback_name: String) -> Self {
        Self {
            name: spec.name.unwrap_or(fallback_name),
            params: spec.params,
            accepts_subtypes: spec.accepts_subtypes,
            variadic: spec.variadic,
            synchronized: spec.synchronized,
            invoker: spec.invoker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter types in document order. A variadic handler
    /// reports its single sequence parameter as the element type.
    pub fn params(&self) -> &[MessageType] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn accepts_subtypes(&self) -> bool {
        self.accepts_subtypes
    }

    /// Element type of the trailing homogeneous sequence, for variadic
    /// handlers.
    pub fn variadic(&self) -> Option<MessageType> {
        self.variadic
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub(crate) fn invoker(&self) -> &Invoker {
        self.invoker.as_ref()
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("accepts_subtypes", &self.accepts_subtypes)
            .field("variadic", &self.variadic)
            .field("synchronized", &self.synchronized)
            .finish()
    }
}

fn listener_of<L: Send + Sync + 'static>(listener: &ListenerObj) -> Result<&L, HandlerError> {
    listener
        .downcast_ref::<L>()
        .ok_or_else(|| HandlerError::failed("listener instance does not match the subscription"))
}

fn arg_of<'a, M: Message>(args: &[&'a dyn Message], idx: usize) -> Result<&'a M, HandlerError> {
    let arg = args
        .get(idx)
        .ok_or_else(|| HandlerError::failed(format!("missing message argument {idx}")))?;
    message_downcast::<M>(*arg).ok_or_else(|| {
        HandlerError::failed(format!(
            "message argument {idx} is not a {}",
            std::any::type_name::<M>()
        ))
    })
}

pub(crate) fn spec1<L, M, F>(f: F) -> HandlerSpec
where
    L: Send + Sync + 'static,
    M: Message,
    F: Fn(&L, &M) -> HandlerResult + Send + Sync + 'static,
{
    let invoker: Arc<Invoker> = Arc::new(move |listener, args| {
        f(listener_of::<L>(listener)?, arg_of::<M>(args, 0)?)
    });
    spec_with(smallvec![MessageType::of::<M>()], None, invoker)
}

pub(crate) fn spec2<L, A, B, F>(f: F) -> HandlerSpec
where
    L: Send + Sync + 'static,
    A: Message,
    B: Message,
    F: Fn(&L, &A, &B) -> HandlerResult + Send + Sync + 'static,
{
    let invoker: Arc<Invoker> = Arc::new(move |listener, args| {
        f(
            listener_of::<L>(listener)?,
            arg_of::<A>(args, 0)?,
            arg_of::<B>(args, 1)?,
        )
    });
    spec_with(
        smallvec![MessageType::of::<A>(), MessageType::of::<B>()],
        None,
        invoker,
    )
}

pub(crate) fn spec3<L, A, B, C, F>(f: F) -> HandlerSpec
where
    L: Send + Sync + 'static,
    A: Message,
    B: Message,
    C: Message,
    F: Fn(&L, &A, &B, &C) -> HandlerResult + Send + Sync + 'static,
{
    let invoker: Arc<Invoker> = Arc::new(move |listener, args| {
        f(
            listener_of::<L>(listener)?,
            arg_of::<A>(args, 0)?,
            arg_of::<B>(args, 1)?,
            arg_of::<C>(args, 2)?,
        )
    });
    spec_with(
        smallvec![
            MessageType::of::<A>(),
            MessageType::of::<B>(),
            MessageType::of::<C>()
        ],
        None,
        invoker,
    )
}

pub(crate) fn spec_varargs<L, M, F>(f: F) -> HandlerSpec
where
    L: Send + Sync + 'static,
    M: Message,
    F: Fn(&L, &[&M]) -> HandlerResult + Send + Sync + 'static,
{
    let invoker: Arc<Invoker> = Arc::new(move |listener, args| {
        let listener = listener_of::<L>(listener)?;
        let mut items: SmallVec<[&M; 4]> = SmallVec::with_capacity(args.len());
        for idx in 0..args.len() {
            items.push(arg_of::<M>(args, idx)?);
        }
        f(listener, &items)
    });
    spec_with(
        smallvec![MessageType::of::<M>()],
        Some(MessageType::of::<M>()),
        invoker,
    )
}

fn spec_with(
    params: SmallVec<[MessageType; 3]>,
    variadic: Option<MessageType>,
    invoker: Arc<Invoker>,
) -> HandlerSpec {
    HandlerSpec {
        name: None,
        params,
        accepts_subtypes: true,
        variadic,
        enabled: true,
        synchronized: false,
        invoker,
    }
}
