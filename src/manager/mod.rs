//! Per connection, per domain caches of remote configuration.
//!
//! A [`Manager`] owns the cached objects of one domain, a staleness flag,
//! and the listeners interested in that domain. All changes go through
//! [`Manager::commit`]: the staged log is applied by the authority as a
//! whole, after which the manager either folds the change into its cache or
//! marks itself stale, and then tells its listeners what changed.
//!
//! The domain specific managers in the submodules are thin layers that
//! know which records to stage for an operation, and which policy to apply
//! after a commit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, error, info, trace, warn};
use tokio::sync::{broadcast, OwnedMutexGuard};

use crate::authority::RemoteAuthority;
use crate::commons::{ConsoleResult, Error};
use crate::edit::{ActionLog, ActionRecord, Editor, Transaction};
use crate::model::{
    apply_records, ChangeEvent, ChangeKind, ConfigObject, Domain, ModelSignal, ObjectId, ObjectSet,
    TransactionId,
};
use crate::registry::ServiceProxies;

pub mod listener;
pub use self::listener::{ChangeListener, ListenerError, ModelListener, Subscription};
use self::listener::Listeners;

mod timed;
pub use self::timed::{RefreshTimer, TimerFire};

mod auth_providers;
pub use self::auth_providers::AuthProviderManager;

mod connectors;
pub use self::connectors::ConnectorManager;

mod entitlements;
pub use self::entitlements::EntitlementManager;

mod extensions;
pub use self::extensions::ExtensionManager;

mod hosts;
pub use self::hosts::HostManager;

mod queries;
pub use self::queries::QueryManager;

mod sessions;
pub use self::sessions::SessionManager;

//------------ ManagerState --------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagerState {
    /// The cache reflects the last known remote state.
    Fresh,

    /// The cache is known to be out of date. Initial state.
    Stale,

    /// A refresh is reading the remote state.
    Refreshing,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ManagerState::Fresh => write!(f, "fresh"),
            ManagerState::Stale => write!(f, "stale"),
            ManagerState::Refreshing => write!(f, "refreshing"),
        }
    }
}

//------------ CommitPolicy --------------------------------------------------

/// What a manager does after its commits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommitPolicy {
    /// Fold committed records into the cache rather than marking the cache
    /// stale. Only done while the cache is fresh.
    pub fold_into_cache: bool,

    /// Mark the cache stale when a destructive operation turned out to have
    /// nothing to commit.
    pub stale_on_empty_destructive: bool,
}

impl CommitPolicy {
    pub const MARK_STALE: CommitPolicy = CommitPolicy {
        fold_into_cache: false,
        stale_on_empty_destructive: false,
    };

    pub const FOLD: CommitPolicy = CommitPolicy {
        fold_into_cache: true,
        stale_on_empty_destructive: false,
    };
}

/// Whether a commit removes things. Only matters when there turns out to be
/// nothing to commit, see [`CommitPolicy::stale_on_empty_destructive`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Intent {
    Constructive,
    Destructive,
}

//------------ CommitOutcome -------------------------------------------------

#[derive(Clone, Debug)]
pub enum CommitOutcome {
    /// There was nothing to commit, the authority was not contacted.
    Skipped,

    /// The authority applied the records.
    Applied(CommitReport),
}

impl CommitOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CommitOutcome::Skipped)
    }

    pub fn report(&self) -> Option<&CommitReport> {
        match self {
            CommitOutcome::Skipped => None,
            CommitOutcome::Applied(report) => Some(report),
        }
    }

    /// The events broadcast for this commit, empty when skipped.
    pub fn events(&self) -> &[ChangeEvent] {
        match self {
            CommitOutcome::Skipped => &[],
            CommitOutcome::Applied(report) => &report.events,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CommitReport {
    transaction: TransactionId,
    records: Vec<ActionRecord>,
    events: Vec<ChangeEvent>,
}

impl CommitReport {
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// The committed state of an object, if this commit created or
    /// modified it.
    pub fn object(&self, id: &ObjectId) -> Option<&ConfigObject> {
        self.events
            .iter()
            .find(|e| e.target() == Some(id) && e.kind() != ChangeKind::Deleted)
            .and_then(ChangeEvent::object)
    }
}

//------------ BusyGuard -----------------------------------------------------

/// Held while a remote call for a manager is in flight. Timer driven
/// refreshes of the manager are dropped while a guard exists. The guard is
/// released when dropped, including on error paths.
pub struct BusyGuard(#[allow(dead_code)] OwnedMutexGuard<()>);

//------------ Manager -------------------------------------------------------

pub struct Manager {
    domain: Domain,
    services: Arc<ServiceProxies>,
    policy: CommitPolicy,

    state: Mutex<ManagerState>,
    cache: RwLock<ObjectSet>,

    // Serializes commits and refreshes. The timer only tries to take it.
    flight: Arc<tokio::sync::Mutex<()>>,

    change_listeners: Listeners<dyn ChangeListener>,
    model_listeners: Listeners<dyn ModelListener>,
    events: broadcast::Sender<ChangeEvent>,
}

/// # Set up and state
impl Manager {
    pub fn new(
        domain: Domain,
        services: Arc<ServiceProxies>,
        policy: CommitPolicy,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Manager {
            domain,
            services,
            policy,
            state: Mutex::new(ManagerState::Stale),
            cache: RwLock::new(ObjectSet::new()),
            flight: Arc::new(tokio::sync::Mutex::new(())),
            change_listeners: Listeners::new(),
            model_listeners: Listeners::new(),
            events,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    pub fn state(&self) -> ManagerState {
        *self.lock_state()
    }

    pub fn is_stale(&self) -> bool {
        self.state() == ManagerState::Stale
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The proxy for this manager's service interface.
    pub fn authority(&self) -> ConsoleResult<Arc<dyn RemoteAuthority>> {
        self.services.get(self.domain.service())
    }

    /// An editor staging into a log owned by the caller.
    pub fn editor<'a>(&self, log: &'a mut ActionLog) -> ConsoleResult<Editor<'a>> {
        Ok(Editor::shared(self.authority()?, log))
    }

    /// Begins a transaction that owns its log.
    pub fn begin(&self) -> ConsoleResult<Transaction> {
        Ok(Transaction::begin(self.authority()?))
    }

    /// Waits until no commit or refresh is in flight, and holds off timer
    /// refreshes until the guard is dropped.
    ///
    /// Do not commit or refresh through this manager while holding the
    /// guard: both wait for it.
    pub async fn busy(&self) -> BusyGuard {
        BusyGuard(self.flight.clone().lock_owned().await)
    }

    pub fn try_busy(&self) -> Option<BusyGuard> {
        self.flight.clone().try_lock_owned().ok().map(BusyGuard)
    }
}

/// # Listeners
impl Manager {
    pub fn subscribe_changes(&self, listener: Arc<dyn ChangeListener>) -> Subscription {
        self.change_listeners.subscribe(listener)
    }

    pub fn subscribe_signals(&self, listener: Arc<dyn ModelListener>) -> Subscription {
        self.model_listeners.subscribe(listener)
    }

    /// A receiver for all change events broadcast from now on. Receivers
    /// that fall behind by more than the channel capacity miss events.
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: &ChangeEvent) {
        trace!("Broadcasting {event}");
        self.change_listeners.broadcast(event);
        // No receivers is fine.
        let _ = self.events.send(event.clone());
    }
}

/// # Cache and staleness
impl Manager {
    /// Marks the cache as out of date. Listeners receive a stale signal
    /// only on the transition, repeated calls are quiet.
    pub fn mark_stale(&self) {
        {
            let mut state = self.lock_state();
            if *state == ManagerState::Stale {
                return;
            }
            *state = ManagerState::Stale;
        }
        debug!("Manager for {} marked stale", self.domain);
        self.model_listeners.broadcast(ModelSignal::Stale(self.domain));
    }

    /// Re-reads the domain from the authority and replaces the cache.
    ///
    /// On failure the manager stays stale, so that the next access tries
    /// again.
    pub async fn refresh(&self) -> ConsoleResult<()> {
        let _guard = self.flight.lock().await;
        self.refresh_in_flight().await
    }

    /// Refreshes, unless a commit, refresh or busy guard is in flight. Used
    /// by the refresh timer: a firing that finds the manager busy is
    /// dropped, not queued.
    pub async fn refresh_if_idle(&self) -> TimerFire {
        let Ok(_guard) = self.flight.try_lock() else {
            debug!("Manager for {} is busy, skipping timed refresh", self.domain);
            return TimerFire::Busy;
        };
        match self.refresh_in_flight().await {
            Ok(()) => TimerFire::Refreshed,
            Err(_) => TimerFire::Failed,
        }
    }

    // Must be called with the flight lock held.
    async fn refresh_in_flight(&self) -> ConsoleResult<()> {
        let before = std::mem::replace(&mut *self.lock_state(), ManagerState::Refreshing);
        self.publish(&ChangeEvent::refresh_start(self.domain));

        let res = match self.authority() {
            Ok(authority) => authority.list(self.domain).await.map_err(|cause| Error::Refresh {
                domain: self.domain,
                cause,
            }),
            Err(e) => Err(e),
        };

        let res = match res {
            Ok(objects) => {
                let nr = objects.len();
                *self.write_cache() = objects.into_iter().map(|o| (o.id().clone(), o)).collect();
                {
                    // A mark_stale during the refresh wins.
                    let mut state = self.lock_state();
                    if *state == ManagerState::Refreshing {
                        *state = ManagerState::Fresh;
                    }
                }
                debug!("Refreshed {} with {} objects", self.domain, nr);
                self.model_listeners.broadcast(ModelSignal::Refreshed(self.domain));
                Ok(())
            }
            Err(e) => {
                error!("{e}");
                let signal = {
                    let mut state = self.lock_state();
                    let signal = *state == ManagerState::Refreshing && before != ManagerState::Stale;
                    *state = ManagerState::Stale;
                    signal
                };
                if signal {
                    self.model_listeners.broadcast(ModelSignal::Stale(self.domain));
                }
                Err(e)
            }
        };

        self.publish(&ChangeEvent::refresh_end(self.domain));
        res
    }

    /// The cached objects, refreshed first unless the cache is fresh.
    pub async fn objects(&self) -> ConsoleResult<Vec<ConfigObject>> {
        if self.state() != ManagerState::Fresh {
            self.refresh().await?;
        }
        Ok(self.read_cache().values().cloned().collect())
    }

    /// The cached state of an object, without refreshing.
    pub fn cached(&self, id: &ObjectId) -> Option<ConfigObject> {
        self.read_cache().get(id).cloned()
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, ObjectSet> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, ObjectSet> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// # Committing
impl Manager {
    /// Drains the log and has the authority apply it.
    ///
    /// An empty log is not submitted. When the authority rejects the
    /// records, the log is discarded, the cache and staleness are left
    /// alone, nobody is notified, and the error is returned.
    ///
    /// On success the cache is updated according to the manager's policy,
    /// and one change event per affected object is broadcast. Listener
    /// failures do not affect the outcome: the change has been made.
    pub async fn commit(&self, log: &mut ActionLog, intent: Intent) -> ConsoleResult<CommitOutcome> {
        let records = log.drain();

        if records.is_empty() {
            if intent == Intent::Destructive && self.policy.stale_on_empty_destructive {
                debug!("Nothing to commit for {}, marking stale after destructive intent", self.domain);
                self.mark_stale();
            } else {
                debug!("Nothing to commit for {}", self.domain);
            }
            return Ok(CommitOutcome::Skipped);
        }

        let authority = self.authority()?;
        let transaction = TransactionId::new();

        let events = {
            let _guard = self.flight.lock().await;

            info!(
                "Committing {} records for {} in transaction {}",
                records.len(),
                self.domain,
                transaction
            );
            if let Err(e) = authority.apply_atomically(&records).await {
                warn!("Transaction {} for {} was not applied: {}", transaction, self.domain, e);
                return Err(Error::Commit(e));
            }

            self.settle(transaction, &records, authority.as_ref()).await
        };

        for event in &events {
            self.publish(event);
        }

        Ok(CommitOutcome::Applied(CommitReport {
            transaction,
            records,
            events,
        }))
    }

    /// Commits everything staged in the transaction.
    pub async fn commit_transaction(
        &self,
        mut transaction: Transaction,
        intent: Intent,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = transaction.take_log();
        self.commit(&mut log, intent).await
    }

    /// Brings the cache in line with an applied transaction and works out
    /// the events for it.
    async fn settle(
        &self,
        transaction: TransactionId,
        records: &[ActionRecord],
        authority: &dyn RemoteAuthority,
    ) -> Vec<ChangeEvent> {
        let changes = changes(records);

        // Replay on a copy of the cache. This only works if the cache was
        // fresh and knows every object involved.
        let (before, folded) = {
            let cache = self.read_cache();
            let fresh = self.state() == ManagerState::Fresh;
            let before: ObjectSet = changes
                .iter()
                .filter_map(|(id, _)| cache.get(id).map(|o| (id.clone(), o.clone())))
                .collect();
            let folded = if fresh {
                let mut working = cache.clone();
                match apply_records(&mut working, records) {
                    Ok(()) => Some(working),
                    Err(e) => {
                        debug!("Cannot fold transaction {} into {} cache: {}", transaction, self.domain, e);
                        None
                    }
                }
            } else {
                None
            };
            (before, folded)
        };

        let mut events = Vec::with_capacity(changes.len());
        for (id, kind) in changes {
            let object = match (kind, folded.as_ref()) {
                (ChangeKind::Deleted, _) => before.get(&id).cloned(),
                (_, Some(folded)) => folded.get(&id).cloned(),
                (_, None) => match authority.read(&id).await {
                    Ok(object) => object,
                    Err(e) => {
                        warn!("Cannot read committed state of {id}: {e}");
                        None
                    }
                },
            };
            events.push(ChangeEvent::committed(kind, id, object, transaction));
        }

        match folded {
            Some(folded) if self.policy.fold_into_cache => {
                *self.write_cache() = folded;
                trace!("Folded transaction {} into {} cache", transaction, self.domain);
            }
            _ => self.mark_stale(),
        }

        events
    }
}

/// The affected objects in order of first appearance, with what happened
/// to each of them overall.
///
/// An object that ends up deleted is deleted. Otherwise it is new if the
/// transaction started by creating it, and modified in all other cases,
/// including when it was deleted and created again.
fn changes(records: &[ActionRecord]) -> Vec<(ObjectId, ChangeKind)> {
    struct Seen {
        created_first: bool,
        deleted: bool,
    }

    let mut order: Vec<ObjectId> = Vec::new();
    let mut seen: BTreeMap<ObjectId, Seen> = BTreeMap::new();

    for record in records {
        let operation = record.operation();
        let entry = seen.entry(record.target().clone()).or_insert_with(|| {
            order.push(record.target().clone());
            Seen {
                created_first: operation.is_create(),
                deleted: false,
            }
        });
        if operation.is_delete() {
            entry.deleted = true;
        } else if operation.is_create() {
            entry.deleted = false;
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            let kind = match seen.remove(&id)? {
                Seen { deleted: true, .. } => ChangeKind::Deleted,
                Seen {
                    created_first: true, ..
                } => ChangeKind::New,
                Seen { .. } => ChangeKind::Modified,
            };
            Some((id, kind))
        })
        .collect()
}

//------------ Tests ---------------------------------------------------------
