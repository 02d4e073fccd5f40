//! Asynchronous dispatch: the bounded envelope queue and the worker pool
//! that drains it into synchronous publications.

mod pool;
mod queue;

pub(crate) use pool::DispatcherPool;
pub(crate) use queue::{DispatchEnvelope, DispatchQueue};
