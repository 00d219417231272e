//! Typed event streams
//!
//! Each layer owns one closed event enum and an [`EventStream`] of it.
//! Observers register explicitly and receive every event emitted after
//! registration, in emission order.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event with a stable kebab-case name (`pattern-detected`, `message-expired`, ...)
pub trait NamedEvent {
    /// Event name
    fn name(&self) -> &'static str;
}

/// Fan-out stream of typed events
///
/// Cloning shares the observer registry.
#[derive(Debug)]
pub struct EventStream<E> {
    source: &'static str,
    observers: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E> Clone for EventStream<E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            observers: Arc::clone(&self.observers),
        }
    }
}

impl<E> EventStream<E>
where
    E: NamedEvent + Clone + Send + 'static,
{
    /// Create a stream labelled with its emitting layer
    #[inline]
    #[must_use]
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an observer
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    /// Emit an event to every live observer
    ///
    /// Observers whose receiver was dropped are pruned.
    pub fn emit(&self, event: E) {
        tracing::debug!(source = self.source, event = event.name(), "event emitted");
        self.observers
            .lock()
            .retain(|observer| observer.send(event.clone()).is_ok());
    }

    /// Number of registered observers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}
