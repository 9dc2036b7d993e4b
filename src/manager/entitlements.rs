use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectId, ObjectKind};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager};

//------------ EntitlementManager --------------------------------------------

/// Manages entitlements and the principals they are granted to. Principal
/// changes are frequent and self contained, so commits are folded into a
/// fresh cache.
pub struct EntitlementManager {
    manager: Arc<Manager>,
}

impl EntitlementManager {
    pub const POLICY: CommitPolicy = CommitPolicy::FOLD;

    pub fn new(services: Arc<ServiceProxies>, event_capacity: usize) -> Self {
        EntitlementManager {
            manager: Arc::new(Manager::new(Domain::Entitlements, services, Self::POLICY, event_capacity)),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub async fn entitlements(&self) -> ConsoleResult<Vec<ConfigObject>> {
        self.manager.objects().await
    }

    /// The entitlements granted to a principal.
    pub async fn granted_to(&self, principal: &str) -> ConsoleResult<Vec<ConfigObject>> {
        Ok(self
            .entitlements()
            .await?
            .into_iter()
            .filter(|e| e.has_member(principal))
            .collect())
    }

    pub async fn create_entitlement(
        &self,
        name: &str,
        properties: BTreeMap<String, String>,
        principals: &[&str],
    ) -> ConsoleResult<CommitOutcome> {
        let id = ObjectId::entitlement(name);
        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        editor.create_with(&id, None, properties).await?;
        for principal in principals {
            editor.add_member(&id, principal)?;
        }
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn add_principal(&self, name: &str, principal: &str) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .add_member(&ObjectId::entitlement(name), principal)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn remove_principal(&self, name: &str, principal: &str) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .remove_member(&ObjectId::entitlement(name), principal)?;
        self.manager.commit(&mut log, Intent::Destructive).await
    }

    /// Removes a principal from every entitlement granted to it. Commits
    /// nothing if there are none.
    pub async fn revoke_principal(&self, principal: &str) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let staged = self
            .manager
            .editor(&mut log)?
            .remove_member_everywhere(ObjectKind::Entitlement, principal)
            .await?;
        debug!("Revoking {} from {} entitlements", principal, staged);
        self.manager.commit(&mut log, Intent::Destructive).await
    }

    pub async fn delete_entitlements(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let mut editor = self.manager.editor(&mut log)?;
        for name in names {
            editor.delete(&ObjectId::entitlement(*name))?;
        }
        self.manager.commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{MemoryAuthority, MemoryConnector};
    use crate::commons::test::{connection, SignalCounter};
    use crate::model::ChangeKind;

    fn entitlements() -> (EntitlementManager, Arc<MemoryAuthority>) {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("entitlements");
        let authority = connector.authority(&conn);
        let services = Arc::new(ServiceProxies::new(conn, connector));
        (EntitlementManager::new(services, 16), authority)
    }

    #[tokio::test]
    async fn revoke_touches_every_holder() {
        let (manager, authority) = entitlements();
        manager.create_entitlement("read", BTreeMap::new(), &["alice", "bob"]).await.unwrap();
        manager.create_entitlement("write", BTreeMap::new(), &["alice"]).await.unwrap();
        manager.create_entitlement("admin", BTreeMap::new(), &["carol"]).await.unwrap();

        let outcome = manager.revoke_principal("alice").await.unwrap();
        let events = outcome.events();
        assert_eq!(2, events.len());
        assert!(events.iter().all(|e| e.kind() == ChangeKind::Modified));
        assert!(events.iter().all(|e| !e.object().unwrap().has_member("alice")));

        assert!(manager.granted_to("alice").await.unwrap().is_empty());
        assert_eq!(1, manager.granted_to("bob").await.unwrap().len());
        assert_eq!(4, authority.transactions().len());
    }

    #[tokio::test]
    async fn revoking_unknown_principal_skips_commit() {
        let (manager, authority) = entitlements();
        manager.create_entitlement("read", BTreeMap::new(), &["bob"]).await.unwrap();
        manager.entitlements().await.unwrap();

        let signals = Arc::new(SignalCounter::default());
        let _sub = manager.manager().subscribe_signals(signals.clone());

        let outcome = manager.revoke_principal("mallory").await.unwrap();
        assert!(outcome.is_skipped());
        assert_eq!(1, authority.transactions().len());
        assert!(!manager.manager().is_stale());
        assert_eq!(0, signals.stale());
    }

    #[tokio::test]
    async fn principal_changes_fold_into_fresh_cache() {
        let (manager, authority) = entitlements();
        manager.create_entitlement("read", BTreeMap::new(), &[]).await.unwrap();
        manager.entitlements().await.unwrap();
        let lists = authority.list_calls();

        manager.add_principal("read", "dave").await.unwrap();
        assert_eq!(1, manager.granted_to("dave").await.unwrap().len());
        manager.remove_principal("read", "dave").await.unwrap();
        assert!(manager.granted_to("dave").await.unwrap().is_empty());

        assert_eq!(lists, authority.list_calls());
    }
}
