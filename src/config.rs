//! # Bus configuration.
//!
//! [`BusConfig`] selects the publish mode and sizes the async dispatcher.
//!
//! # Example
//! ```
//! use typebus::{BusConfig, PublishMode};
//!
//! let mut cfg = BusConfig::default();
//! cfg.publish_mode = PublishMode::ExactWithSuperTypesAndVarArgs;
//! cfg.worker_threads = 4;
//!
//! assert_eq!(cfg.worker_threads, 4);
//! ```

use serde::{Deserialize, Serialize};

/// Which matches a publication resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    /// Exact signature matches only.
    Exact,
    /// Exact matches plus handlers declared on super-types of the
    /// published type (when the handler accepts sub-types).
    ExactWithSuperTypes,
    /// Exact and super-type matches plus variadic matching of homogeneous
    /// tuples and arrays.
    ExactWithSuperTypesAndVarArgs,
}

impl Default for PublishMode {
    fn default() -> Self {
        PublishMode::ExactWithSuperTypes
    }
}

impl PublishMode {
    pub(crate) fn matches_super_types(self) -> bool {
        !matches!(self, PublishMode::Exact)
    }

    pub(crate) fn matches_var_args(self) -> bool {
        matches!(self, PublishMode::ExactWithSuperTypesAndVarArgs)
    }
}

/// Configuration for a [`MessageBus`](crate::MessageBus).
///
/// Controls match resolution and the async dispatcher pool size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Publish mode used by every publication on this bus.
    pub publish_mode: PublishMode,
    /// Number of async dispatch workers. Clamped to at least 2 and rounded
    /// up to a power of two; also sizes the dispatch queue.
    pub worker_threads: usize,
}

impl Default for BusConfig {
    /// Provides a default configuration:
    /// - `publish_mode = ExactWithSuperTypes`
    /// - `worker_threads = half the available cores` (at least 2)
    fn default() -> Self {
        let half_cores = std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(2);
        Self {
            publish_mode: PublishMode::default(),
            worker_threads: half_cores.max(2),
        }
    }
}

impl BusConfig {
    /// Worker count actually used: at least 2, rounded up to a power of
    /// two.
    pub(crate) fn effective_workers(&self) -> usize {
        self.worker_threads.max(2).next_power_of_two()
    }
}
