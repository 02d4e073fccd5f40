//! Super-type cache.
//!
//! [`TypeGraph`] expands the parent edges declared through
//! [`Message::parents`](crate::Message::parents) into the full, transitive
//! super-type sequence of a concrete message type, composing the
//! child-to-parent projections along each path.
//!
//! Order is deterministic: breadth-first over the declared edges in
//! declaration order, first occurrence wins on diamonds, and the type
//! itself is excluded. There is no implicit root type, so nothing has to be
//! filtered out at the top of the walk.

use std::any::TypeId;
use std::collections::VecDeque;

use dashmap::DashMap;

use crate::message::{collect_edges, compose_projections, Message, MessageType, Projection, SuperEdge};

/// One resolved super-type of a concrete message type: its identity plus
/// the composed projection from the concrete type into it.
pub(crate) struct SuperType {
    pub(crate) ty: MessageType,
    pub(crate) project: Projection,
}

/// Caches the expanded super-type sequence per concrete message type.
///
/// Entries are immutable once computed (a type's declared parents cannot
/// change at runtime), so the cache is never invalidated.
pub(crate) struct TypeGraph {
    cache: DashMap<TypeId, std::sync::Arc<[SuperType]>>,
}

impl TypeGraph {
    pub(crate) fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Computes (or returns the cached) super-type sequence of `M`.
    pub(crate) fn ensure<M: Message>(&self) -> std::sync::Arc<[SuperType]> {
        let id = TypeId::of::<M>();
        if let Some(hit) = self.cache.get(&id) {
            return hit.value().clone();
        }
        let walked = walk(collect_edges::<M>(), id);
        self.cache.entry(id).or_insert(walked).value().clone()
    }

    /// Cached super-type sequence of a type already touched by a publish.
    pub(crate) fn supers(&self, id: TypeId) -> Option<std::sync::Arc<[SuperType]>> {
        self.cache.get(&id).map(|entry| entry.value().clone())
    }
}

struct Pending {
    ty: MessageType,
    project: Projection,
    expand: fn() -> Vec<SuperEdge>,
}

fn walk(roots: Vec<SuperEdge>, origin: TypeId) -> std::sync::Arc<[SuperType]> {
    let mut seen: Vec<TypeId> = vec![origin];
    let mut out: Vec<SuperType> = Vec::new();
    let mut queue: VecDeque<Pending> = roots
        .into_iter()
        .map(|edge| Pending {
            ty: edge.ty,
            project: edge.project,
            expand: edge.expand,
        })
        .collect();

    while let Some(pending) = queue.pop_front() {
        if seen.contains(&pending.ty.id()) {
            continue;
        }
        seen.push(pending.ty.id());
        for edge in (pending.expand)() {
            queue.push_back(Pending {
                ty: edge.ty,
                project: compose_projections(pending.project.clone(), edge.project),
                expand: edge.expand,
            });
        }
        out.push(SuperType {
            ty: pending.ty,
            project: pending.project,
        });
    }

    out.into()
}
