use std::collections::BTreeMap;
use std::sync::Arc;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectId};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager};

//------------ ExtensionManager ----------------------------------------------

/// Manages the extension modules deployed on the server.
pub struct ExtensionManager {
    manager: Arc<Manager>,
}

impl ExtensionManager {
    pub const POLICY: CommitPolicy = CommitPolicy::MARK_STALE;

    pub fn new(services: Arc<ServiceProxies>, event_capacity: usize) -> Self {
        ExtensionManager {
            manager: Arc::new(Manager::new(Domain::Extensions, services, Self::POLICY, event_capacity)),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub async fn modules(&self) -> ConsoleResult<Vec<ConfigObject>> {
        self.manager.objects().await
    }

    pub async fn add_module(
        &self,
        name: &str,
        properties: BTreeMap<String, String>,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .create_with(&ObjectId::extension(name), None, properties)
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
            .set_properties(&ObjectId::extension(name), properties)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn remove_modules(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        for name in names {
            editor.delete(&ObjectId::extension(*name))?;
        }
        self.manager.commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{AuthorityError, MemoryConnector};
    use crate::commons::test::connection;
    use crate::commons::Error;
    use crate::model::ObjectKind;

    #[tokio::test]
    async fn failed_default_lookup_stages_nothing() {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("extensions");
        let authority = connector.authority(&conn);
        authority.set_defaults(ObjectKind::ExtensionModule, &[("classpath", "lib")]);
        let manager = ExtensionManager::new(Arc::new(ServiceProxies::new(conn, connector)), 16);

        authority.fail_lookups(Some(AuthorityError::Unavailable("restarting".to_string())));
        let res = manager.add_module("audit", BTreeMap::new()).await;
        assert!(matches!(res, Err(Error::Staging { .. })));
        assert_eq!(0, authority.submissions());

        authority.fail_lookups(None);
        let outcome = manager.add_module("audit", BTreeMap::new()).await.unwrap();
        let module = outcome.report().unwrap().object(&ObjectId::extension("audit")).unwrap();
        assert_eq!(Some("lib"), module.property("classpath"));

        manager.remove_modules(&["audit"]).await.unwrap();
        assert!(manager.modules().await.unwrap().is_empty());
    }
}
