//! Subscriptions to manager notifications.
//!
//! There are two channels. [`ModelListener`]s receive the coarse
//! [`ModelSignal`]s, [`ChangeListener`]s the per-object [`ChangeEvent`]s.
//! Subscribing returns a [`Subscription`]; the listener stays registered
//! until the subscription is closed or dropped.
//!
//! Listeners are called synchronously, in no particular order. By the time
//! they are called the change has already happened, so they have no way to
//! object to it: a listener that fails or panics is logged and skipped, and
//! the remaining listeners are still called.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::warn;

use crate::model::{ChangeEvent, ModelSignal};

//------------ ChangeListener ------------------------------------------------

pub trait ChangeListener: Send + Sync + 'static {
    fn changed(&self, event: &ChangeEvent) -> Result<(), ListenerError>;
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn changed(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

//------------ ModelListener -------------------------------------------------

pub trait ModelListener: Send + Sync + 'static {
    fn signal(&self, signal: ModelSignal) -> Result<(), ListenerError>;
}

impl<F> ModelListener for F
where
    F: Fn(ModelSignal) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn signal(&self, signal: ModelSignal) -> Result<(), ListenerError> {
        self(signal)
    }
}

//------------ ListenerError -------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(msg: impl fmt::Display) -> Self {
        ListenerError(msg.to_string())
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ListenerError {}

//------------ Subscription --------------------------------------------------

/// Keeps a listener registered. Closing or dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unsubscribes now.
    pub fn close(mut self) {
        self.run_unsubscribe();
    }

    fn run_unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

//------------ Listeners -----------------------------------------------------

/// The listeners registered on one channel.
pub(crate) struct Listeners<L: ?Sized> {
    inner: Arc<Mutex<Entries<L>>>,
}

struct Entries<L: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<L>)>,
}

impl<L: ?Sized + Send + Sync + 'static> Listeners<L> {
    pub fn new() -> Self {
        Listeners {
            inner: Arc::new(Mutex::new(Entries {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(inner: &Mutex<Entries<L>>) -> MutexGuard<'_, Entries<L>> {
        inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, listener: Arc<L>) -> Subscription {
        let id = {
            let mut entries = Self::lock(&self.inner);
            let id = entries.next_id;
            entries.next_id += 1;
            entries.entries.push((id, listener));
            id
        };

        // Weak, so that an outstanding subscription does not keep the
        // manager's listener list alive.
        let weak: Weak<Mutex<Entries<L>>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// The listeners registered right now. Broadcasting works on this copy
    /// so that listeners can subscribe or unsubscribe while being called.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        Self::lock(&self.inner)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        Self::lock(&self.inner).entries.len()
    }
}

impl Listeners<dyn ChangeListener> {
    pub fn broadcast(&self, event: &ChangeEvent) {
        for listener in self.snapshot() {
            deliver(event, || listener.changed(event));
        }
    }
}

impl Listeners<dyn ModelListener> {
    pub fn broadcast(&self, signal: ModelSignal) {
        for listener in self.snapshot() {
            deliver(&signal, || listener.signal(signal));
        }
    }
}

/// Calls one listener, containing whatever goes wrong.
fn deliver(what: &dyn fmt::Display, call: impl FnOnce() -> Result<(), ListenerError>) {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Listener failed to handle '{what}': {e}"),
        Err(_) => warn!("Listener panicked while handling '{what}'"),
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::Domain;

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn ModelListener> {
        Arc::new(move |_signal: ModelSignal| -> Result<(), ListenerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn closing_and_dropping_unsubscribe() {
        let listeners: Listeners<dyn ModelListener> = Listeners::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = listeners.subscribe(counting(counter.clone()));
        let second = listeners.subscribe(counting(counter.clone()));
        assert_eq!(2, listeners.len());

        listeners.broadcast(ModelSignal::Stale(Domain::Hosts));
        assert_eq!(2, counter.load(Ordering::SeqCst));

        first.close();
        drop(second);
        assert_eq!(0, listeners.len());

        listeners.broadcast(ModelSignal::Stale(Domain::Hosts));
        assert_eq!(2, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn failing_listeners_do_not_stop_the_broadcast() {
        let listeners: Listeners<dyn ModelListener> = Listeners::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let failing: Arc<dyn ModelListener> =
            Arc::new(|_signal: ModelSignal| -> Result<(), ListenerError> { Err(ListenerError::new("cannot cope")) });
        let panicking: Arc<dyn ModelListener> = Arc::new(|_signal: ModelSignal| -> Result<(), ListenerError> {
            panic!("listener bug")
        });

        let _a = listeners.subscribe(failing);
        let _b = listeners.subscribe(panicking);
        let _c = listeners.subscribe(counting(counter.clone()));

        listeners.broadcast(ModelSignal::Refreshed(Domain::Queries));
        assert_eq!(1, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn subscription_outliving_listeners_is_harmless() {
        let listeners: Listeners<dyn ModelListener> = Listeners::new();
        let sub = listeners.subscribe(counting(Arc::new(AtomicUsize::new(0))));
        drop(listeners);
        sub.close();
    }
}
