//! # Error Types and the Publication Error Sink
//!
//! No error raised inside a handler ever escapes a publish call. Handler
//! failures, configuration mistakes found at discovery, and async enqueue
//! failures are all captured as [`PublicationError`]s and routed through
//! the bus-wide error sink, where dynamically registered
//! [`PublicationErrorHandler`]s consume them.
//!
//! Two signals travel the same `Result` channel as errors but are not
//! errors: [`HandlerError::Cancel`] (stop delivering the current message to
//! the remaining listeners of one subscription) and dead messages (handled
//! by the matcher, never reported here).

use std::error::Error;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::error;

use crate::message::MessageRef;
use crate::stats::StatCounters;

/// Result type returned by message handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Outcome a handler can raise while processing a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Stops delivery of the current message to the remaining listeners of
    /// the subscription being traversed. Not reported to the error sink.
    #[error("dispatch cancelled by handler")]
    Cancel,

    /// Handler failed with a plain description.
    #[error("{0}")]
    Failed(String),

    /// Handler failed with an underlying error.
    #[error("handler failed: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Failure with a plain description.
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }

    /// Failure wrapping an underlying error.
    pub fn other(source: impl Error + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(source))
    }
}

/// Errors raised by the bus machinery itself (as opposed to handlers).
#[derive(Debug, Error)]
pub enum BusError {
    /// A handler declaration carried no message parameters.
    #[error("handler '{handler}' on {listener} declares no message parameters")]
    ZeroArityHandler {
        listener: &'static str,
        handler: String,
    },

    /// An asynchronous publication could not be enqueued.
    #[error("async publish rejected: {0}")]
    Queue(String),

    /// A dispatch worker lost its queue outside of an orderly shutdown.
    #[error("dispatch worker interrupted outside of shutdown")]
    Interrupted,
}

/// One captured publication failure: what the bus was doing, the underlying
/// cause, and the message tuple that was being published.
pub struct PublicationError {
    context: &'static str,
    cause: Option<Box<dyn Error + Send + Sync>>,
    published: SmallVec<[MessageRef; 3]>,
}

impl PublicationError {
    pub(crate) fn new(context: &'static str) -> Self {
        Self {
            context,
            cause: None,
            published: SmallVec::new(),
        }
    }

    pub(crate) fn cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub(crate) fn published(mut self, messages: &[MessageRef]) -> Self {
        self.published = messages.iter().cloned().collect();
        self
    }

    /// What the bus was doing when the error occurred.
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// The underlying failure, when one exists.
    pub fn error_cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// The message tuple that was being published.
    pub fn published_messages(&self) -> &[MessageRef] {
        &self.published
    }
}

impl fmt::Display for PublicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        if !self.published.is_empty() {
            write!(f, " (published: ")?;
            for (idx, message) in self.published.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{message:?}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PublicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationError")
            .field("context", &self.context)
            .field("cause", &self.cause)
            .field("published", &self.published)
            .finish()
    }
}

impl Error for PublicationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// Consumer of captured publication errors.
///
/// Registration is dynamic and thread-safe; see
/// [`MessageBus::add_error_handler`](crate::MessageBus::add_error_handler).
pub trait PublicationErrorHandler: Send + Sync {
    fn handle_error(&self, error: &PublicationError);
}

/// Fallback handler that writes every error to standard error.
///
/// Installed automatically by [`MessageBus::start`](crate::MessageBus::start)
/// when no handler was registered.
pub struct StderrErrorHandler;

impl PublicationErrorHandler for StderrErrorHandler {
    fn handle_error(&self, error: &PublicationError) {
        eprintln!("typebus publication error: {error}");
    }
}

/// Bus-wide collector that fans captured errors out to the registered
/// handlers.
pub(crate) struct ErrorSink {
    handlers: RwLock<Vec<Arc<dyn PublicationErrorHandler>>>,
    stats: Arc<StatCounters>,
}

impl ErrorSink {
    pub(crate) fn new(stats: Arc<StatCounters>) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            stats,
        }
    }

    pub(crate) fn add_handler(&self, handler: Arc<dyn PublicationErrorHandler>) {
        self.handlers.write().push(handler);
    }

    /// Installs the stderr fallback when nothing is registered yet.
    /// Returns whether the fallback was installed.
    pub(crate) fn install_fallback(&self) -> bool {
        let mut handlers = self.handlers.write();
        if handlers.is_empty() {
            handlers.push(Arc::new(StderrErrorHandler));
            true
        } else {
            false
        }
    }

    pub(crate) fn publish_error(&self, publication_error: PublicationError) {
        self.stats.publication_errors.fetch_add(1, Ordering::Relaxed);
        let handlers = self.handlers.read();
        if handlers.is_empty() {
            error!("❌ unhandled publication error: {publication_error}");
            return;
        }
        for handler in handlers.iter() {
            handler.handle_error(&publication_error);
        }
    }
}
