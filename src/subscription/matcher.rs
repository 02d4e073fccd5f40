//! Publish-mode matcher.
//!
//! Resolves which subscriptions receive a published tuple and drives the
//! delivery: exact signature matches first, then super-type matches, then
//! variadic matches when the mode enables them. A publication that matches
//! no subscription at all is re-published once, wrapped as a
//! [`DeadMessage`], against the handlers declared for `DeadMessage`; if
//! that set is empty too the publication completes silently.
//!
//! Ordering guarantee: within one publish call, exact matches are
//! delivered before super-type matches, each group in bucket order.
//! Nothing tighter is promised.

use std::any::TypeId;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::PublishMode;
use crate::error::ErrorSink;
use crate::message::{runtime_type, DeadMessage, Message, MessageRef, Projection};
use crate::stats::StatCounters;
use crate::subscription::table::{Signature, SubscriptionTable};

/// How a tuple was published: as scalar arguments or as one homogeneous
/// array. Scalar handlers never see array publications and vice versa,
/// except through the variadic matcher.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PublishKind {
    Scalar,
    Array,
}

pub(crate) struct Matcher {
    mode: PublishMode,
}

/// One position of a candidate signature: the type to look up and the
/// projection to apply to the published value (`None` = exact position).
type Link = (TypeId, Option<Projection>);

impl Matcher {
    pub(crate) fn new(mode: PublishMode) -> Self {
        Self { mode }
    }

    pub(crate) fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Synchronous delivery of one published tuple.
    pub(crate) fn publish(
        &self,
        table: &SubscriptionTable,
        sink: &ErrorSink,
        stats: &StatCounters,
        messages: &[MessageRef],
        kind: PublishKind,
    ) {
        if messages.is_empty() {
            debug!("empty publication; nothing to deliver");
            return;
        }

        let mut matched = false;

        match kind {
            PublishKind::Scalar => {
                if messages.len() == 1 {
                    matched |= self.publish_single(table, sink, messages);
                } else {
                    matched |= self.publish_tuple(table, sink, messages);
                }
                if self.mode.matches_var_args() {
                    matched |= self.publish_var_args(table, sink, messages);
                }
            }
            PublishKind::Array => {
                matched |= self.publish_tuple(table, sink, messages);
                if self.mode.matches_var_args() {
                    matched |= self.publish_var_args(table, sink, messages);
                }
            }
        }

        if !matched {
            stats.dead_messages.fetch_add(1, Ordering::Relaxed);
            self.publish_dead(table, sink, messages);
        }
    }

    /// Exact plus (mode permitting) super-type delivery of an arity-1
    /// scalar publication.
    fn publish_single(
        &self,
        table: &SubscriptionTable,
        sink: &ErrorSink,
        messages: &[MessageRef],
    ) -> bool {
        let message = &messages[0];
        let message_id = runtime_type(&**message);
        let mut matched = false;

        if let Some(subscriptions) = table.exact_single(message_id) {
            matched = !subscriptions.is_empty();
            let args: [&dyn Message; 1] = [&**message];
            for subscription in subscriptions.iter() {
                subscription.invoke(sink, &args, messages);
            }
        }

        if self.mode.matches_super_types() {
            for candidate in table.super_single(message_id) {
                matched = true;
                match (candidate.project)(&**message) {
                    Some(projected) => {
                        let args: [&dyn Message; 1] = [projected];
                        candidate.subscription.invoke(sink, &args, messages);
                    }
                    None => warn!(
                        listener = candidate.subscription.listener_name(),
                        handler = candidate.subscription.descriptor().name(),
                        "super-type projection did not apply; skipping delivery"
                    ),
                }
            }
        }

        matched
    }

    /// Exact plus (mode permitting) super-type delivery of an arity ≥ 2
    /// tuple.
    fn publish_tuple(
        &self,
        table: &SubscriptionTable,
        sink: &ErrorSink,
        messages: &[MessageRef],
    ) -> bool {
        let exact = Signature(messages.iter().map(|m| runtime_type(&**m)).collect());
        let mut matched = false;

        if let Some(subscriptions) = table.exact_multi(&exact) {
            matched = !subscriptions.is_empty();
            let args: SmallVec<[&dyn Message; 3]> =
                messages.iter().map(|m| &**m as &dyn Message).collect();
            for subscription in subscriptions.iter() {
                subscription.invoke(sink, &args, messages);
            }
        }

        if self.mode.matches_super_types() && (2..=3).contains(&messages.len()) {
            matched |= self.publish_tuple_supers(table, sink, messages);
        }

        matched
    }

    /// Super-type delivery for tuples: the cross product of per-position
    /// super chains (exact type first, then declared supers), minus the
    /// all-exact combination already handled.
    fn publish_tuple_supers(
        &self,
        table: &SubscriptionTable,
        sink: &ErrorSink,
        messages: &[MessageRef],
    ) -> bool {
        let chains: SmallVec<[Vec<Link>; 3]> = messages
            .iter()
            .map(|m| {
                let message_id = runtime_type(&**m);
                let mut chain: Vec<Link> = vec![(message_id, None)];
                if let Some(supers) = table.hierarchy_of(message_id) {
                    for parent in supers.iter() {
                        chain.push((parent.ty.id(), Some(parent.project.clone())));
                    }
                }
                chain
            })
            .collect();

        let mut matched = false;
        match chains.len() {
            2 => {
                for (i, a) in chains[0].iter().enumerate() {
                    for (j, b) in chains[1].iter().enumerate() {
                        if i == 0 && j == 0 {
                            continue;
                        }
                        matched |= self.deliver_combo(table, sink, messages, &[a, b]);
                    }
                }
            }
            3 => {
                for (i, a) in chains[0].iter().enumerate() {
                    for (j, b) in chains[1].iter().enumerate() {
                        for (k, c) in chains[2].iter().enumerate() {
                            if i == 0 && j == 0 && k == 0 {
                                continue;
                            }
                            matched |= self.deliver_combo(table, sink, messages, &[a, b, c]);
                        }
                    }
                }
            }
            _ => {}
        }
        matched
    }

    fn deliver_combo(
        &self,
        table: &SubscriptionTable,
        sink: &ErrorSink,
        messages: &[MessageRef],
        combo: &[&Link],
    ) -> bool {
        let signature = Signature(combo.iter().map(|link| link.0).collect());
        let subscriptions = match table.exact_multi(&signature) {
            Some(subscriptions) => subscriptions,
            None => return false,
        };

        let mut args: SmallVec<[&dyn Message; 3]> = SmallVec::with_capacity(combo.len());
        for (position, link) in combo.iter().enumerate() {
            match &link.1 {
                None => args.push(&*messages[position]),
                Some(project) => match project(&*messages[position]) {
                    Some(projected) => args.push(projected),
                    None => {
                        warn!("super-type projection did not apply; skipping combination");
                        return false;
                    }
                },
            }
        }

        let mut matched = false;
        for subscription in subscriptions.iter() {
            if subscription.descriptor().accepts_subtypes() {
                matched = true;
                subscription.invoke(sink, &args, messages);
            }
        }
        matched
    }

    /// Variadic delivery: all published values share one concrete type and
    /// a variadic handler exists for it.
    fn publish_var_args(
        &self,
        table: &SubscriptionTable,
        sink: &ErrorSink,
        messages: &[MessageRef],
    ) -> bool {
        if !table.var_arg_possible() {
            return false;
        }
        let element_id = runtime_type(&*messages[0]);
        if messages[1..]
            .iter()
            .any(|m| runtime_type(&**m) != element_id)
        {
            return false;
        }
        let subscriptions = match table.var_args(element_id) {
            Some(subscriptions) => subscriptions,
            None => return false,
        };

        let args: SmallVec<[&dyn Message; 3]> =
            messages.iter().map(|m| &**m as &dyn Message).collect();
        let matched = !subscriptions.is_empty();
        for subscription in subscriptions.iter() {
            subscription.invoke(sink, &args, messages);
        }
        matched
    }

    /// Re-publishes an unmatched tuple once, wrapped as a [`DeadMessage`].
    fn publish_dead(&self, table: &SubscriptionTable, sink: &ErrorSink, messages: &[MessageRef]) {
        let subscriptions = match table.exact_single(TypeId::of::<DeadMessage>()) {
            Some(subscriptions) if !subscriptions.is_empty() => subscriptions,
            _ => {
                debug!("publication matched no handlers and no dead-message listener exists");
                return;
            }
        };

        let dead: MessageRef = Arc::new(DeadMessage::new(messages));
        let originals = [dead.clone()];
        let args: [&dyn Message; 1] = [&*dead];
        for subscription in subscriptions.iter() {
            subscription.invoke(sink, &args, &originals);
        }
    }
}
