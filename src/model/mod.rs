//! The configuration objects that managers cache and editors target.
//!
//! Objects are identified by an [`ObjectId`]: the object kind plus a name
//! that is stable for the lifetime of the object on the remote side. Records
//! in an action log always refer to objects by this identity, never by
//! reference to a cached copy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::authority::AuthorityError;
use crate::edit::{ActionRecord, Operation};

mod event;
pub use self::event::{ChangeEvent, ChangeKind, ModelSignal, TransactionId};

//------------ Domain --------------------------------------------------------

/// A functional area of the cluster configuration.
///
/// Each connection has exactly one manager per domain.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Hosts,
    Connectors,
    AuthProviders,
    Entitlements,
    Extensions,
    Sessions,
    Queries,
}

impl Domain {
    pub const ALL: [Domain; 7] = [
        Domain::Hosts,
        Domain::Connectors,
        Domain::AuthProviders,
        Domain::Entitlements,
        Domain::Extensions,
        Domain::Sessions,
        Domain::Queries,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Hosts => "hosts",
            Domain::Connectors => "connectors",
            Domain::AuthProviders => "auth_providers",
            Domain::Entitlements => "entitlements",
            Domain::Extensions => "extensions",
            Domain::Sessions => "sessions",
            Domain::Queries => "queries",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------ ObjectKind ----------------------------------------------------

/// The kinds of objects known to the console.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Host,
    Process,
    ConnectorBinding,
    AuthProvider,
    Entitlement,
    ExtensionModule,
    Session,
    Query,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 8] = [
        ObjectKind::Host,
        ObjectKind::Process,
        ObjectKind::ConnectorBinding,
        ObjectKind::AuthProvider,
        ObjectKind::Entitlement,
        ObjectKind::ExtensionModule,
        ObjectKind::Session,
        ObjectKind::Query,
    ];

    /// The domain whose manager caches objects of this kind.
    pub fn domain(self) -> Domain {
        match self {
            ObjectKind::Host | ObjectKind::Process => Domain::Hosts,
            ObjectKind::ConnectorBinding => Domain::Connectors,
            ObjectKind::AuthProvider => Domain::AuthProviders,
            ObjectKind::Entitlement => Domain::Entitlements,
            ObjectKind::ExtensionModule => Domain::Extensions,
            ObjectKind::Session => Domain::Sessions,
            ObjectKind::Query => Domain::Queries,
        }
    }

    /// The kind of the container reported as context in change events, if
    /// objects of this kind live inside one.
    pub fn container(self) -> Option<ObjectKind> {
        match self {
            ObjectKind::Process => Some(ObjectKind::Host),
            ObjectKind::Query => Some(ObjectKind::Session),
            ObjectKind::Host
            | ObjectKind::ConnectorBinding
            | ObjectKind::AuthProvider
            | ObjectKind::Entitlement
            | ObjectKind::ExtensionModule
            | ObjectKind::Session => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Host => "host",
            ObjectKind::Process => "process",
            ObjectKind::ConnectorBinding => "connector_binding",
            ObjectKind::AuthProvider => "auth_provider",
            ObjectKind::Entitlement => "entitlement",
            ObjectKind::ExtensionModule => "extension_module",
            ObjectKind::Session => "session",
            ObjectKind::Query => "query",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(ObjectKind::Host),
            "process" => Ok(ObjectKind::Process),
            "connector_binding" => Ok(ObjectKind::ConnectorBinding),
            "auth_provider" => Ok(ObjectKind::AuthProvider),
            "entitlement" => Ok(ObjectKind::Entitlement),
            "extension_module" => Ok(ObjectKind::ExtensionModule),
            "session" => Ok(ObjectKind::Session),
            "query" => Ok(ObjectKind::Query),
            _ => Err(ObjectIdError(s.to_string())),
        }
    }
}

//------------ ObjectId ------------------------------------------------------

/// The stable identity of a configuration object.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ObjectId {
    kind: ObjectKind,
    name: String,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        ObjectId {
            kind,
            name: name.into(),
        }
    }

    pub fn host(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Host, name)
    }

    /// Processes are named within their host.
    pub fn process(host: &str, name: &str) -> Self {
        Self::new(ObjectKind::Process, format!("{host}.{name}"))
    }

    pub fn binding(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::ConnectorBinding, name)
    }

    pub fn auth_provider(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::AuthProvider, name)
    }

    pub fn entitlement(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Entitlement, name)
    }

    pub fn extension(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::ExtensionModule, name)
    }

    pub fn session(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Session, name)
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Query, name)
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> Domain {
        self.kind.domain()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s.split_once('/').ok_or_else(|| ObjectIdError(s.to_string()))?;
        if name.is_empty() {
            return Err(ObjectIdError(s.to_string()));
        }
        Ok(ObjectId::new(ObjectKind::from_str(kind)?, name))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectIdError(String);

impl fmt::Display for ObjectIdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid object id: '{}'", self.0)
    }
}

impl std::error::Error for ObjectIdError {}

//------------ ConfigObject --------------------------------------------------

/// The state of one configuration object as known to the authority.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConfigObject {
    id: ObjectId,
    parent: Option<ObjectId>,
    enabled: bool,
    properties: BTreeMap<String, String>,
    members: BTreeSet<String>,
}

impl ConfigObject {
    pub fn new(id: ObjectId, parent: Option<ObjectId>) -> Self {
        ConfigObject {
            id,
            parent,
            enabled: true,
            properties: BTreeMap::new(),
            members: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.id.kind()
    }

    pub fn parent(&self) -> Option<&ObjectId> {
        self.parent.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn has_member(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    /// Applies a non-structural operation. Create and delete change the
    /// set of objects rather than one object, see [`apply_record`].
    fn apply(&mut self, op: &Operation) {
        match op {
            Operation::SetProperty { name, value } => {
                self.properties.insert(name.clone(), value.clone());
            }
            Operation::Enable { enabled } => self.enabled = *enabled,
            Operation::AddMember { member } => {
                self.members.insert(member.clone());
            }
            Operation::RemoveMember { member } => {
                self.members.remove(member);
            }
            Operation::Create { .. } | Operation::Delete => {}
        }
    }
}

//------------ ObjectSet -----------------------------------------------------

/// A set of objects keyed by identity.
pub type ObjectSet = BTreeMap<ObjectId, ConfigObject>;

/// Folds one record into a set of objects.
///
/// This is the single definition of what a record means. The in-memory
/// authority applies it to its state, and managers apply it to their cache
/// when they fold a committed log instead of re-reading.
pub fn apply_record(objects: &mut ObjectSet, record: &ActionRecord) -> Result<(), AuthorityError> {
    let target = record.target();
    match record.operation() {
        Operation::Create { parent } => {
            if objects.contains_key(target) {
                return Err(AuthorityError::DuplicateObject(target.clone()));
            }
            if let Some(parent) = parent {
                if !objects.contains_key(parent) {
                    return Err(AuthorityError::UnknownObject(parent.clone()));
                }
            }
            objects.insert(target.clone(), ConfigObject::new(target.clone(), parent.clone()));
            Ok(())
        }
        Operation::Delete => {
            if !objects.contains_key(target) {
                return Err(AuthorityError::UnknownObject(target.clone()));
            }
            if objects.values().any(|o| o.parent() == Some(target)) {
                return Err(AuthorityError::HasDependents(target.clone()));
            }
            objects.remove(target);
            Ok(())
        }
        op => match objects.get_mut(target) {
            Some(object) => {
                object.apply(op);
                Ok(())
            }
            None => Err(AuthorityError::UnknownObject(target.clone())),
        },
    }
}

/// Folds a sequence of records, in order, stopping at the first failure.
/// The set may be left partially updated on failure, callers wanting
/// all-or-nothing work on a copy.
pub fn apply_records(objects: &mut ObjectSet, records: &[ActionRecord]) -> Result<(), AuthorityError> {
    for record in records {
        apply_record(objects, record)?;
    }
    Ok(())
}

//------------ Tests ---------------------------------------------------------
