//! # typebus
//!
//! An in-process, type-routed publish/subscribe message bus for parallel
//! OS threads.
//!
//! Listener types declare handler methods; publishers hand the bus plain
//! values; every compatible handler is invoked. Publication is either
//! synchronous (returns after delivery) or asynchronous (enqueues onto a
//! bounded queue drained by a worker pool).
//!
//! ## Core Features
//!
//! | Area                   | Description                                                        | Key types / traits                          |
//! |------------------------|--------------------------------------------------------------------|---------------------------------------------|
//! | **Handler discovery**  | Declarative handler registration, normalized and cached per type.  | [`Listener`], [`HandlerSet`]                |
//! | **Typed routing**      | Exact signature matching over arity 1–N tuples.                    | [`MessageBus::publish`], [`Message`]        |
//! | **Super-type matching**| Deliver to handlers declared on a message's declared super-types.  | [`SupertypeSet`], [`PublishMode`]           |
//! | **Variadic matching**  | Homogeneous tuples and arrays reach sequence handlers.             | [`HandlerSet::on_varargs`]                  |
//! | **Async dispatch**     | Bounded MPMC queue, fixed worker pool, blocking (never dropping).  | [`MessageBus::publish_async`]               |
//! | **Error routing**      | No handler error escapes a publish; all go to the error sink.      | [`PublicationErrorHandler`], [`HandlerError`] |
//! | **Dead messages**      | Unmatched publications are re-published once, wrapped.             | [`DeadMessage`]                             |
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use typebus::{BusConfig, HandlerResult, HandlerSet, Listener, Message, MessageBus};
//!
//! #[derive(Debug)]
//! struct SensorReading {
//!     celsius: f64,
//! }
//! impl Message for SensorReading {}
//!
//! #[derive(Default)]
//! struct Thermostat;
//!
//! impl Thermostat {
//!     fn on_reading(&self, reading: &SensorReading) -> HandlerResult {
//!         if reading.celsius > 30.0 {
//!             println!("too hot: {}", reading.celsius);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! impl Listener for Thermostat {
//!     fn handlers(set: &mut HandlerSet<Self>) {
//!         set.on(Thermostat::on_reading).named("on_reading");
//!     }
//! }
//!
//! let bus = MessageBus::new(BusConfig::default());
//! let thermostat = Arc::new(Thermostat);
//! bus.subscribe(&thermostat);
//! bus.publish(SensorReading { celsius: 31.5 });
//!
//! // async delivery goes through the worker pool
//! bus.start();
//! bus.publish_async(SensorReading { celsius: 18.0 });
//! bus.shutdown();
//! ```
//!
//! ## Concurrency Model
//!
//! Subscribe and unsubscribe are serialized by a single writer lock.
//! Publication never takes that lock: readers work off atomically replaced
//! snapshots of the subscription buckets, and a publish only locks a
//! single subscription briefly when it unlinks a garbage-collected
//! listener entry. Listeners are held weakly; dropping the last `Arc` to a
//! listener unregisters it lazily.

mod bus;
mod config;
mod dispatch;
mod error;
mod handler;
mod hierarchy;
mod listener;
mod message;
mod stats;
mod subscription;

#[cfg(test)]
mod test_integration;

pub use bus::MessageBus;
pub use config::{BusConfig, PublishMode};
pub use error::{
    BusError, HandlerError, HandlerResult, PublicationError, PublicationErrorHandler,
    StderrErrorHandler,
};
pub use handler::{HandlerDescriptor, HandlerSpec};
pub use listener::{HandlerSet, Listener};
pub use message::{DeadMessage, Message, MessageRef, MessageType, SupertypeSet};
pub use stats::BusStats;
