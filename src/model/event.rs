use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConfigObject, Domain, ObjectId};

//------------ TransactionId -------------------------------------------------

/// Identifies one committed action log, for correlating log lines and the
/// change events that follow from it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ ChangeKind ----------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Modified,
    Deleted,
    RefreshStart,
    RefreshEnd,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChangeKind::New => write!(f, "new"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::RefreshStart => write!(f, "refresh-start"),
            ChangeKind::RefreshEnd => write!(f, "refresh-end"),
        }
    }
}

//------------ ChangeEvent ---------------------------------------------------

/// A fine grained notification about a committed change to one object, or
/// the bracket around a refresh of a whole domain.
///
/// Events are immutable once built. They are not stored anywhere; they only
/// live for the duration of a broadcast.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChangeEvent {
    kind: ChangeKind,
    domain: Domain,
    target: Option<ObjectId>,
    object: Option<ConfigObject>,
    context: Vec<ObjectId>,
    transaction: Option<TransactionId>,
    time: DateTime<Utc>,
}

impl ChangeEvent {
    /// Builds the event for a committed change to `target`.
    ///
    /// For new and modified objects `object` is the state after the commit,
    /// for deleted objects the last state known before it (if any). The
    /// context is derived from the object's kind: contained objects report
    /// their container.
    pub fn committed(
        kind: ChangeKind,
        target: ObjectId,
        object: Option<ConfigObject>,
        transaction: TransactionId,
    ) -> Self {
        let context = match (target.kind().container(), object.as_ref()) {
            (Some(container), Some(object)) => object
                .parent()
                .filter(|parent| parent.kind() == container)
                .cloned()
                .into_iter()
                .collect(),
            (Some(_), None) | (None, _) => Vec::new(),
        };

        ChangeEvent {
            kind,
            domain: target.domain(),
            target: Some(target),
            object,
            context,
            transaction: Some(transaction),
            time: Utc::now(),
        }
    }

    pub fn refresh_start(domain: Domain) -> Self {
        Self::bracket(ChangeKind::RefreshStart, domain)
    }

    pub fn refresh_end(domain: Domain) -> Self {
        Self::bracket(ChangeKind::RefreshEnd, domain)
    }

    fn bracket(kind: ChangeKind, domain: Domain) -> Self {
        ChangeEvent {
            kind,
            domain,
            target: None,
            object: None,
            context: Vec::new(),
            transaction: None,
            time: Utc::now(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn target(&self) -> Option<&ObjectId> {
        self.target.as_ref()
    }

    pub fn object(&self) -> Option<&ConfigObject> {
        self.object.as_ref()
    }

    pub fn context(&self) -> &[ObjectId] {
        &self.context
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} {}", self.kind, target),
            None => write!(f, "{} {}", self.kind, self.domain),
        }
    }
}

//------------ ModelSignal ---------------------------------------------------

/// The coarse grained notification channel. Observers receiving `Stale`
/// decide for themselves whether to re-query now or later.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSignal {
    Stale(Domain),
    Refreshed(Domain),
}

impl ModelSignal {
    pub fn domain(&self) -> Domain {
        match self {
            ModelSignal::Stale(domain) | ModelSignal::Refreshed(domain) => *domain,
        }
    }
}

impl fmt::Display for ModelSignal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelSignal::Stale(domain) => write!(f, "{domain} is stale"),
            ModelSignal::Refreshed(domain) => write!(f, "{domain} was refreshed"),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contained_objects_report_their_container() {
        let host = ObjectId::host("alpha");
        let process = ObjectId::process("alpha", "p1");
        let object = ConfigObject::new(process.clone(), Some(host.clone()));

        let event = ChangeEvent::committed(ChangeKind::New, process, Some(object), TransactionId::new());
        assert_eq!(&[host], event.context());
        assert_eq!(Domain::Hosts, event.domain());
    }

    #[test]
    fn top_level_objects_have_no_context() {
        let binding = ObjectId::binding("oracle");
        let object = ConfigObject::new(binding.clone(), None);
        let event = ChangeEvent::committed(ChangeKind::Modified, binding, Some(object), TransactionId::new());
        assert!(event.context().is_empty());
        assert_eq!("modified connector_binding/oracle", event.to_string());
    }

    #[test]
    fn refresh_brackets_carry_no_object() {
        let start = ChangeEvent::refresh_start(Domain::Sessions);
        assert_eq!(ChangeKind::RefreshStart, start.kind());
        assert!(start.target().is_none());
        assert!(start.transaction().is_none());
        assert_eq!("refresh-start sessions", start.to_string());
    }
}
