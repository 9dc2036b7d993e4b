//! Connections and everything kept per connection.
//!
//! A [`ConnectionRegistry`] is an explicit context object: create one per
//! process (or per test) and hand it to whatever needs managers or service
//! proxies. For each initialized connection it holds exactly one manager
//! per domain, and at most one proxy per service interface.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use log::{debug, info};
use url::Url;

use crate::authority::{RemoteAuthority, ServiceConnector, ServiceKind};
use crate::commons::{ConsoleResult, Error};
use crate::config::Config;
use crate::manager::{
    AuthProviderManager, ConnectorManager, EntitlementManager, ExtensionManager, HostManager, ListenerError, Manager,
    QueryManager, SessionManager, Subscription,
};
use crate::model::{ChangeEvent, Domain};

//------------ ConnectionId --------------------------------------------------

/// Identifies a connection to a server by its URL.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(Url);

impl ConnectionId {
    pub fn new(url: Url) -> Self {
        ConnectionId(url)
    }

    pub fn parse(s: &str) -> Result<Self, url::ParseError> {
        Url::parse(s).map(ConnectionId)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl FromStr for ConnectionId {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ ServiceProxies ------------------------------------------------

/// The memoized service proxies of one connection.
///
/// Once closed, no proxies are handed out or created any more. This keeps
/// managers that outlive their registration from reconnecting.
pub struct ServiceProxies {
    connection: ConnectionId,
    connector: Arc<dyn ServiceConnector>,
    proxies: Mutex<HashMap<ServiceKind, Arc<dyn RemoteAuthority>>>,

    // Only changed while holding the proxies lock.
    closed: AtomicBool,
}

impl ServiceProxies {
    pub fn new(connection: ConnectionId, connector: Arc<dyn ServiceConnector>) -> Self {
        ServiceProxies {
            connection,
            connector,
            proxies: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceKind, Arc<dyn RemoteAuthority>>> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The proxy for a service interface, created on first use.
    pub fn get(&self, service: ServiceKind) -> ConsoleResult<Arc<dyn RemoteAuthority>> {
        let mut proxies = self.lock();
        if self.is_closed() {
            return Err(Error::UnknownConnection(self.connection.clone()));
        }
        if let Some(proxy) = proxies.get(&service) {
            return Ok(proxy.clone());
        }

        // Connect under the lock, so there is never more than one proxy.
        let proxy = self
            .connector
            .connect(&self.connection, service)
            .map_err(|cause| Error::Connect {
                connection: self.connection.clone(),
                service,
                cause,
            })?;
        debug!("Created {} proxy for {}", service, self.connection);
        proxies.insert(service, proxy.clone());
        Ok(proxy)
    }

    /// Drops all proxies, they are recreated on next use.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drops all proxies for good.
    pub fn close(&self) {
        let mut proxies = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        proxies.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

//------------ ConnectionManagers --------------------------------------------

/// One manager per domain for a connection.
pub struct ConnectionManagers {
    services: Arc<ServiceProxies>,

    pub hosts: HostManager,
    pub connectors: ConnectorManager,
    pub auth_providers: AuthProviderManager,
    pub entitlements: EntitlementManager,
    pub extensions: ExtensionManager,
    pub sessions: SessionManager,
    pub queries: QueryManager,

    // Terminating sessions also ends their queries.
    _session_queries: Subscription,
}

impl ConnectionManagers {
    pub fn new(services: Arc<ServiceProxies>, config: &Config) -> Self {
        let capacity = config.event_channel_capacity;
        let auto_refresh = config.auto_refresh;

        let sessions = SessionManager::new(
            services.clone(),
            config.refresh_period(Domain::Sessions),
            auto_refresh,
            capacity,
        );
        let queries = QueryManager::new(
            services.clone(),
            config.refresh_period(Domain::Queries),
            auto_refresh,
            capacity,
        );

        let weak_queries: Weak<Manager> = Arc::downgrade(queries.manager());
        let _session_queries = sessions
            .manager()
            .subscribe_changes(Arc::new(move |event: &ChangeEvent| -> Result<(), ListenerError> {
                if event.domain() == Domain::Queries {
                    if let Some(queries) = weak_queries.upgrade() {
                        queries.mark_stale();
                    }
                }
                Ok(())
            }));

        ConnectionManagers {
            hosts: HostManager::new(services.clone(), capacity),
            connectors: ConnectorManager::new(services.clone(), capacity),
            auth_providers: AuthProviderManager::new(services.clone(), capacity),
            entitlements: EntitlementManager::new(services.clone(), capacity),
            extensions: ExtensionManager::new(services.clone(), capacity),
            sessions,
            queries,
            services,
            _session_queries,
        }
    }

    pub fn services(&self) -> &Arc<ServiceProxies> {
        &self.services
    }

    pub fn get(&self, domain: Domain) -> &Arc<Manager> {
        match domain {
            Domain::Hosts => self.hosts.manager(),
            Domain::Connectors => self.connectors.manager(),
            Domain::AuthProviders => self.auth_providers.manager(),
            Domain::Entitlements => self.entitlements.manager(),
            Domain::Extensions => self.extensions.manager(),
            Domain::Sessions => self.sessions.manager(),
            Domain::Queries => self.queries.manager(),
        }
    }

    pub fn start_timers(&self) {
        self.sessions.timer().start();
        self.queries.timer().start();
    }

    pub fn stop_timers(&self) {
        self.sessions.timer().stop();
        self.queries.timer().stop();
    }
}

//------------ ConnectionRegistry --------------------------------------------

pub struct ConnectionRegistry {
    connector: Arc<dyn ServiceConnector>,
    config: Arc<Config>,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionManagers>>>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn ServiceConnector>, config: Arc<Config>) -> Self {
        ConnectionRegistry {
            connector,
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnectionId, Arc<ConnectionManagers>>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<ConnectionManagers>>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets up a connection with fresh managers and no proxies. Anything
    /// registered for the connection before is dropped first.
    ///
    /// Timers are started when auto refresh is on, which needs a runtime.
    pub fn init(&self, connection: &ConnectionId) -> Arc<ConnectionManagers> {
        let services = Arc::new(ServiceProxies::new(connection.clone(), self.connector.clone()));
        let managers = Arc::new(ConnectionManagers::new(services, &self.config));

        let previous = self.write().insert(connection.clone(), managers.clone());
        match previous {
            Some(previous) => {
                info!("Re-initialized connection {connection}");
                Self::release(&previous);
            }
            None => info!("Initialized connection {connection}"),
        }

        managers.start_timers();
        managers
    }

    pub fn managers(&self, connection: &ConnectionId) -> Option<Arc<ConnectionManagers>> {
        self.read().get(connection).cloned()
    }

    pub fn get_manager(&self, connection: &ConnectionId, domain: Domain) -> Option<Arc<Manager>> {
        self.read().get(connection).map(|managers| managers.get(domain).clone())
    }

    pub fn get_service_proxy(
        &self,
        connection: &ConnectionId,
        service: ServiceKind,
    ) -> ConsoleResult<Arc<dyn RemoteAuthority>> {
        self.managers(connection)
            .ok_or_else(|| Error::UnknownConnection(connection.clone()))?
            .services()
            .get(service)
    }

    /// Drops the memoized proxies of a connection, leaving its managers
    /// alone.
    pub fn clear_services(&self, connection: &ConnectionId) -> ConsoleResult<()> {
        let managers = self
            .managers(connection)
            .ok_or_else(|| Error::UnknownConnection(connection.clone()))?;
        managers.services().clear();
        debug!("Cleared service proxies for {connection}");
        Ok(())
    }

    /// Drops everything kept for a connection. Returns whether there was
    /// anything.
    pub fn remove_connection(&self, connection: &ConnectionId) -> bool {
        let removed = self.write().remove(connection);
        match removed {
            Some(managers) => {
                info!("Removed connection {connection}");
                Self::release(&managers);
                true
            }
            None => false,
        }
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.read().keys().cloned().collect()
    }

    // Other holders of the managers may keep them alive for a while, but
    // they no longer refresh or reach the server.
    fn release(managers: &ConnectionManagers) {
        managers.stop_timers();
        managers.services().close();
    }
}

//------------ Tests ---------------------------------------------------------
