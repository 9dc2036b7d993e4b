//! Helper functions for testing the console.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::authority::MemoryConnector;
use crate::config::Config;
use crate::manager::{ChangeListener, ListenerError, ModelListener};
use crate::model::{ChangeEvent, ChangeKind, ModelSignal, ObjectId};
use crate::registry::{ConnectionId, ConnectionRegistry};

pub fn init_logging() {
    // Only the first call in a test binary gets to install the logger.
    let _ = Config::test().init_logging();
}

/// A connection id for a server with the given name.
pub fn connection(name: &str) -> ConnectionId {
    ConnectionId::parse(&format!("mms://{name}:31000")).unwrap()
}

/// A registry backed by in-memory authorities.
pub fn memory_registry(config: Config) -> (ConnectionRegistry, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), Arc::new(config));
    (registry, connector)
}

//------------ RecordingListener ---------------------------------------------

/// Remembers every change event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn kinds(&self) -> Vec<ChangeKind> {
        self.events().iter().map(ChangeEvent::kind).collect()
    }

    /// The targets of the committed changes, ignoring refresh brackets.
    pub fn targets(&self) -> Vec<ObjectId> {
        self.events().iter().filter_map(|e| e.target().cloned()).collect()
    }
}

impl ChangeListener for RecordingListener {
    fn changed(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

//------------ SignalCounter -------------------------------------------------

/// Counts model signals by type.
#[derive(Debug, Default)]
pub struct SignalCounter {
    stale: AtomicUsize,
    refreshed: AtomicUsize,
}

impl SignalCounter {
    pub fn stale(&self) -> usize {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn refreshed(&self) -> usize {
        self.refreshed.load(Ordering::SeqCst)
    }
}

impl ModelListener for SignalCounter {
    fn signal(&self, signal: ModelSignal) -> Result<(), ListenerError> {
        match signal {
            ModelSignal::Stale(_) => self.stale.fetch_add(1, Ordering::SeqCst),
            ModelSignal::Refreshed(_) => self.refreshed.fetch_add(1, Ordering::SeqCst),
        };
        Ok(())
    }
}
