//! An authority that keeps all state in memory.
//!
//! Used to run the console against a simulated server, and throughout the
//! tests. Failures can be injected to exercise the rollback paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::trace;

use crate::edit::ActionRecord;
use crate::model::{apply_records, ConfigObject, Domain, ObjectId, ObjectKind, ObjectSet};
use crate::registry::ConnectionId;

use super::{AuthorityError, RemoteAuthority, ServiceConnector, ServiceKind};

//------------ MemoryAuthority -----------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryAuthority(Mutex<MemoryState>);

#[derive(Debug, Default)]
struct MemoryState {
    objects: ObjectSet,
    defaults: HashMap<ObjectKind, BTreeMap<String, String>>,

    // Every successfully applied transaction, in order.
    transactions: Vec<Vec<ActionRecord>>,
    submissions: usize,
    lists: usize,

    fail_next_apply: Option<AuthorityError>,
    fail_lookups: Option<AuthorityError>,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts an object in place without going through a transaction.
    pub fn seed(&self, object: ConfigObject) {
        self.lock().objects.insert(object.id().clone(), object);
    }

    pub fn set_defaults(&self, kind: ObjectKind, defaults: &[(&str, &str)]) {
        let defaults = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.lock().defaults.insert(kind, defaults);
    }

    /// Makes the next call to `apply_atomically` fail with the given error.
    pub fn fail_next_apply(&self, err: AuthorityError) {
        self.lock().fail_next_apply = Some(err);
    }

    /// Makes all reads fail with the given error until called with `None`.
    pub fn fail_lookups(&self, err: Option<AuthorityError>) {
        self.lock().fail_lookups = err;
    }

    /// The successfully applied transactions.
    pub fn transactions(&self) -> Vec<Vec<ActionRecord>> {
        self.lock().transactions.clone()
    }

    /// The number of calls to `apply_atomically`, successful or not.
    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    /// The number of calls to `list`.
    pub fn list_calls(&self) -> usize {
        self.lock().lists
    }

    pub fn objects(&self) -> Vec<ConfigObject> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn get(&self, id: &ObjectId) -> Option<ConfigObject> {
        self.lock().objects.get(id).cloned()
    }

    fn check_lookups(state: &MemoryState) -> Result<(), AuthorityError> {
        match &state.fail_lookups {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteAuthority for MemoryAuthority {
    async fn apply_atomically(&self, records: &[ActionRecord]) -> Result<(), AuthorityError> {
        let mut state = self.lock();
        state.submissions += 1;

        if let Some(err) = state.fail_next_apply.take() {
            return Err(err);
        }
        if records.is_empty() {
            return Err(AuthorityError::EmptyTransaction);
        }

        // Work on a copy so that a failing record leaves nothing behind.
        let mut objects = state.objects.clone();
        apply_records(&mut objects, records)?;

        trace!("Applied {} records in memory", records.len());
        state.objects = objects;
        state.transactions.push(records.to_vec());
        Ok(())
    }

    async fn read(&self, id: &ObjectId) -> Result<Option<ConfigObject>, AuthorityError> {
        let state = self.lock();
        Self::check_lookups(&state)?;
        Ok(state.objects.get(id).cloned())
    }

    async fn list(&self, domain: Domain) -> Result<Vec<ConfigObject>, AuthorityError> {
        let mut state = self.lock();
        state.lists += 1;
        Self::check_lookups(&state)?;
        Ok(state
            .objects
            .values()
            .filter(|o| o.id().domain() == domain)
            .cloned()
            .collect())
    }

    async fn property_defaults(&self, kind: ObjectKind) -> Result<BTreeMap<String, String>, AuthorityError> {
        let state = self.lock();
        Self::check_lookups(&state)?;
        Ok(state.defaults.get(&kind).cloned().unwrap_or_default())
    }
}

//------------ MemoryConnector -----------------------------------------------

/// Hands out in-memory authorities, one per connection. All service
/// interfaces of a connection share the same state, as they would on a
/// real server.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    authorities: Mutex<HashMap<ConnectionId, Arc<MemoryAuthority>>>,
    connects: AtomicUsize,
    refuse: Mutex<Option<AuthorityError>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing authority for a connection, created if needed.
    pub fn authority(&self, connection: &ConnectionId) -> Arc<MemoryAuthority> {
        self.authorities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(connection.clone())
            .or_default()
            .clone()
    }

    /// How many proxies were created so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes proxy creation fail until called with `None`.
    pub fn refuse(&self, err: Option<AuthorityError>) {
        *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }
}

impl ServiceConnector for MemoryConnector {
    fn connect(
        &self,
        connection: &ConnectionId,
        _service: ServiceKind,
    ) -> Result<Arc<dyn RemoteAuthority>, AuthorityError> {
        if let Some(err) = self.refuse.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(err);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.authority(connection))
    }
}

//------------ Tests ---------------------------------------------------------
