use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectId, ObjectKind};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager};

/// The property naming the connector type a binding instantiates.
pub const CONNECTOR_TYPE: &str = "connector_type";

//------------ ConnectorManager ----------------------------------------------

/// Manages connector bindings. Binding changes are local to the binding,
/// so commits are folded into a fresh cache instead of forcing a re-read.
pub struct ConnectorManager {
    manager: Arc<Manager>,
}

impl ConnectorManager {
    pub const POLICY: CommitPolicy = CommitPolicy::FOLD;

    pub fn new(services: Arc<ServiceProxies>, event_capacity: usize) -> Self {
        ConnectorManager {
            manager: Arc::new(Manager::new(Domain::Connectors, services, Self::POLICY, event_capacity)),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub async fn bindings(&self) -> ConsoleResult<Vec<ConfigObject>> {
        self.manager.objects().await
    }

    /// Creates a binding for a connector type with the server defaults
    /// overridden by `properties`, and optionally enables or disables it,
    /// all in one commit.
    pub async fn create_binding(
        &self,
        name: &str,
        connector_type: &str,
        mut properties: BTreeMap<String, String>,
        enabled: Option<bool>,
    ) -> ConsoleResult<CommitOutcome> {
        let id = ObjectId::binding(name);
        properties.insert(CONNECTOR_TYPE.to_string(), connector_type.to_string());

        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        editor.create_with(&id, None, properties).await?;
        if let Some(enabled) = enabled {
            editor.set_enabled(&id, enabled)?;
        }
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn set_properties(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .set_properties(&ObjectId::binding(name), properties)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn set_enabled(&self, names: &[&str], enabled: bool) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        for name in names {
            editor.set_enabled(&ObjectId::binding(*name), enabled)?;
        }
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn delete_bindings(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        for name in names {
            editor.delete(&ObjectId::binding(*name))?;
        }
        self.manager.commit(&mut log, Intent::Destructive).await
    }

    /// Deletes every binding of a connector type. Commits nothing if there
    /// are none.
    pub async fn remove_connector_type(&self, connector_type: &str) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let staged = self
            .manager
            .editor(&mut log)?
            .delete_matching(ObjectKind::ConnectorBinding, |binding| {
                binding.property(CONNECTOR_TYPE) == Some(connector_type)
            })
            .await?;
        debug!("Connector type {} has {} bindings to remove", connector_type, staged);
        self.manager.commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{MemoryAuthority, MemoryConnector};
    use crate::commons::test::{connection, RecordingListener, SignalCounter};
    use crate::model::ChangeKind;

    fn connectors() -> (ConnectorManager, Arc<MemoryAuthority>) {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("connectors");
        let authority = connector.authority(&conn);
        authority.set_defaults(ObjectKind::ConnectorBinding, &[("pool_size", "4"), ("timeout", "30")]);
        let services = Arc::new(ServiceProxies::new(conn, connector));
        (ConnectorManager::new(services, 16), authority)
    }

    #[tokio::test]
    async fn create_binding_is_one_transaction() {
        let (manager, authority) = connectors();
        manager.bindings().await.unwrap();

        let mut props = BTreeMap::new();
        props.insert("timeout".to_string(), "5".to_string());
        let outcome = manager
            .create_binding("oracle", "jdbc", props, Some(false))
            .await
            .unwrap();

        assert_eq!(1, authority.transactions().len());
        let event = &outcome.events()[0];
        assert_eq!(ChangeKind::New, event.kind());
        let binding = event.object().unwrap();
        assert_eq!(Some("5"), binding.property("timeout"));
        assert_eq!(Some("4"), binding.property("pool_size"));
        assert_eq!(Some("jdbc"), binding.property(CONNECTOR_TYPE));
        assert!(!binding.is_enabled());

        // folded, no re-read
        assert!(!manager.manager().is_stale());
        assert_eq!(1, manager.bindings().await.unwrap().len());
        assert_eq!(1, authority.list_calls());
    }

    #[tokio::test]
    async fn batch_enable_notifies_per_binding() {
        let (manager, _authority) = connectors();
        manager.create_binding("a", "jdbc", BTreeMap::new(), None).await.unwrap();
        manager.create_binding("b", "jdbc", BTreeMap::new(), None).await.unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let _sub = manager.manager().subscribe_changes(recorder.clone());
        manager.set_enabled(&["a", "b"], false).await.unwrap();

        assert_eq!(vec![ChangeKind::Modified, ChangeKind::Modified], recorder.kinds());
    }

    #[tokio::test]
    async fn removing_unused_connector_type_does_nothing() {
        let (manager, authority) = connectors();
        manager.create_binding("oracle", "jdbc", BTreeMap::new(), None).await.unwrap();
        manager.bindings().await.unwrap();

        let signals = Arc::new(SignalCounter::default());
        let recorder = Arc::new(RecordingListener::default());
        let _a = manager.manager().subscribe_signals(signals.clone());
        let _b = manager.manager().subscribe_changes(recorder.clone());

        let submissions = authority.submissions();
        let outcome = manager.remove_connector_type("ldap").await.unwrap();
        assert!(outcome.is_skipped());
        assert_eq!(submissions, authority.submissions());
        assert!(!manager.manager().is_stale());
        assert_eq!(0, signals.stale());
        assert!(recorder.events().is_empty());

        let outcome = manager.remove_connector_type("jdbc").await.unwrap();
        assert_eq!(1, outcome.events().len());
        assert!(manager.bindings().await.unwrap().is_empty());
    }
}
