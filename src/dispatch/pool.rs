//! Dispatcher pool.
//!
//! A fixed set of named OS threads, each looping take → synchronous
//! publish. Shutdown raises the bus-wide flag and closes the queue; a
//! worker that wakes up while the flag is set discards the envelope it
//! took and exits. Draining the queue on shutdown is explicitly not
//! guaranteed: envelopes still buffered when the workers exit are
//! discarded.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::bus::BusCore;
use crate::error::{BusError, PublicationError};

pub(crate) struct DispatcherPool {
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatcherPool {
    pub(crate) fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `count` workers. Idempotent: a pool that already has workers
    /// keeps them.
    pub(crate) fn start(&self, count: usize, core: Arc<BusCore>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for index in 0..count {
            let core = core.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("typebus-dispatch-{index}"))
                .spawn(move || worker_loop(core));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => error!("failed to spawn dispatch worker {index}: {err}"),
            }
        }
        debug!(workers = workers.len(), "dispatcher pool started");
    }

    /// Waits for every worker to exit. Called after the queue is closed.
    pub(crate) fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("dispatch worker panicked");
            }
        }
    }
}

fn worker_loop(core: Arc<BusCore>) {
    debug!("dispatch worker started");
    loop {
        match core.queue().take() {
            Some(envelope) => {
                if core.is_shutting_down() {
                    debug!("discarding envelope taken during shutdown");
                    break;
                }
                core.publish_envelope(envelope);
            }
            None => {
                if !core.is_shutting_down() {
                    core.sink().publish_error(
                        PublicationError::new("dispatch worker lost its queue")
                            .cause(BusError::Interrupted),
                    );
                }
                break;
            }
        }
    }
    debug!("dispatch worker stopped");
}
