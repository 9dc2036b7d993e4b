//! The boundary to the remote server that owns the configuration.
//!
//! Everything behind [`RemoteAuthority`] is external: the RPC mechanism,
//! the serialization, the server itself. What this crate relies on is that
//! [`RemoteAuthority::apply_atomically`] applies either all records or none,
//! and that a failure leaves the remote state unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::edit::ActionRecord;
use crate::model::{ConfigObject, Domain, ObjectId, ObjectKind};
use crate::registry::ConnectionId;

mod memory;
pub use self::memory::{MemoryAuthority, MemoryConnector};

//------------ RemoteAuthority -----------------------------------------------

#[async_trait]
pub trait RemoteAuthority: Send + Sync + 'static {
    /// Applies all records in order, or none of them.
    ///
    /// Implementations may reject an empty sequence, callers are expected
    /// not to submit one.
    async fn apply_atomically(&self, records: &[ActionRecord]) -> Result<(), AuthorityError>;

    /// Reads the current state of a single object.
    async fn read(&self, id: &ObjectId) -> Result<Option<ConfigObject>, AuthorityError>;

    /// Reads the current state of all objects in a domain.
    async fn list(&self, domain: Domain) -> Result<Vec<ConfigObject>, AuthorityError>;

    /// The property values the server assigns to a new object of a kind.
    async fn property_defaults(&self, kind: ObjectKind) -> Result<BTreeMap<String, String>, AuthorityError>;
}

//------------ ServiceKind ---------------------------------------------------

/// The remote service interfaces. A connection holds at most one proxy per
/// interface.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Configuration,
    Authorization,
    Extensions,
    Runtime,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceKind::Configuration => write!(f, "configuration"),
            ServiceKind::Authorization => write!(f, "authorization"),
            ServiceKind::Extensions => write!(f, "extensions"),
            ServiceKind::Runtime => write!(f, "runtime"),
        }
    }
}

impl Domain {
    /// The service interface used by the manager for this domain.
    pub fn service(self) -> ServiceKind {
        match self {
            Domain::Hosts | Domain::Connectors => ServiceKind::Configuration,
            Domain::AuthProviders | Domain::Entitlements => ServiceKind::Authorization,
            Domain::Extensions => ServiceKind::Extensions,
            Domain::Sessions | Domain::Queries => ServiceKind::Runtime,
        }
    }
}

//------------ ServiceConnector ----------------------------------------------

/// Creates the proxy for one service interface on one connection.
///
/// Proxies are created lazily on first use and then memoized by the
/// registry until the connection's services are cleared.
pub trait ServiceConnector: Send + Sync + 'static {
    fn connect(
        &self,
        connection: &ConnectionId,
        service: ServiceKind,
    ) -> Result<Arc<dyn RemoteAuthority>, AuthorityError>;
}

//------------ AuthorityError ------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthorityError {
    Unavailable(String),
    Rejected(String),
    UnknownObject(ObjectId),
    DuplicateObject(ObjectId),
    HasDependents(ObjectId),
    EmptyTransaction,
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthorityError::Unavailable(msg) => write!(f, "remote service unavailable: {msg}"),
            AuthorityError::Rejected(msg) => write!(f, "rejected by remote service: {msg}"),
            AuthorityError::UnknownObject(id) => write!(f, "unknown object '{id}'"),
            AuthorityError::DuplicateObject(id) => write!(f, "object '{id}' already exists"),
            AuthorityError::HasDependents(id) => write!(f, "object '{id}' still has dependents"),
            AuthorityError::EmptyTransaction => write!(f, "empty transaction"),
        }
    }
}

impl std::error::Error for AuthorityError {}
