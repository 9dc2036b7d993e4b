use std::collections::BTreeMap;
use std::sync::Arc;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectId};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager};

//------------ AuthProviderManager -------------------------------------------

/// Manages authentication providers. Provider changes affect the server's
/// provider chain as a whole, so commits mark the cache stale.
pub struct AuthProviderManager {
    manager: Arc<Manager>,
}

impl AuthProviderManager {
    pub const POLICY: CommitPolicy = CommitPolicy::MARK_STALE;

    pub fn new(services: Arc<ServiceProxies>, event_capacity: usize) -> Self {
        AuthProviderManager {
            manager: Arc::new(Manager::new(Domain::AuthProviders, services, Self::POLICY, event_capacity)),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub async fn providers(&self) -> ConsoleResult<Vec<ConfigObject>> {
        self.manager.objects().await
    }

    pub async fn create_provider(
        &self,
        name: &str,
        properties: BTreeMap<String, String>,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .create_with(&ObjectId::auth_provider(name), None, properties)
            .await?;
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
            .set_properties(&ObjectId::auth_provider(name), properties)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .set_enabled(&ObjectId::auth_provider(name), enabled)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn delete_providers(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        for name in names {
            editor.delete(&ObjectId::auth_provider(*name))?;
        }
        self.manager.commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{AuthorityError, MemoryConnector};
    use crate::commons::test::{connection, RecordingListener, SignalCounter};
    use crate::commons::Error;

    #[tokio::test]
    async fn rejected_delete_changes_nothing() {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("providers");
        let authority = connector.authority(&conn);
        let manager = AuthProviderManager::new(Arc::new(ServiceProxies::new(conn, connector)), 16);

        manager.create_provider("ldap", BTreeMap::new()).await.unwrap();
        manager.providers().await.unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let signals = Arc::new(SignalCounter::default());
        let _a = manager.manager().subscribe_changes(recorder.clone());
        let _b = manager.manager().subscribe_signals(signals.clone());

        // the second one does not exist, so the whole batch fails
        let res = manager.delete_providers(&["ldap", "kerberos"]).await;
        match res {
            Err(Error::Commit(AuthorityError::UnknownObject(id))) => {
                assert_eq!(ObjectId::auth_provider("kerberos"), id)
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(authority.get(&ObjectId::auth_provider("ldap")).is_some());
        assert!(recorder.events().is_empty());
        assert_eq!(0, signals.stale());
        assert!(!manager.manager().is_stale());
    }

    #[tokio::test]
    async fn commits_mark_stale() {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("providers");
        let manager = AuthProviderManager::new(Arc::new(ServiceProxies::new(conn, connector)), 16);

        manager.create_provider("ldap", BTreeMap::new()).await.unwrap();
        manager.providers().await.unwrap();
        manager.set_enabled("ldap", false).await.unwrap();
        assert!(manager.manager().is_stale());

        let providers = manager.providers().await.unwrap();
        assert!(!providers[0].is_enabled());
    }
}
