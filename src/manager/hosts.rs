use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectId, ObjectKind};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager};

//------------ HostManager ---------------------------------------------------

/// Manages the hosts of a connection and the processes running on them.
///
/// Host changes ripple through the server side configuration in ways that
/// cannot be predicted locally, so every commit marks the cache stale. This
/// includes removals that turned out to have nothing to remove.
pub struct HostManager {
    manager: Arc<Manager>,
}

impl HostManager {
    pub const POLICY: CommitPolicy = CommitPolicy {
        fold_into_cache: false,
        stale_on_empty_destructive: true,
    };

    pub fn new(services: Arc<ServiceProxies>, event_capacity: usize) -> Self {
        HostManager {
            manager: Arc::new(Manager::new(Domain::Hosts, services, Self::POLICY, event_capacity)),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub async fn hosts(&self) -> ConsoleResult<Vec<ConfigObject>> {
        Ok(self
            .manager
            .objects()
            .await?
            .into_iter()
            .filter(|o| o.kind() == ObjectKind::Host)
            .collect())
    }

    pub async fn processes(&self, host: &str) -> ConsoleResult<Vec<ConfigObject>> {
        let host = ObjectId::host(host);
        Ok(self
            .manager
            .objects()
            .await?
            .into_iter()
            .filter(|o| o.kind() == ObjectKind::Process && o.parent() == Some(&host))
            .collect())
    }

    pub async fn add_host(
        &self,
        name: &str,
        properties: BTreeMap<String, String>,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .create_with(&ObjectId::host(name), None, properties)
            .await?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn add_process(
        &self,
        host: &str,
        name: &str,
        properties: BTreeMap<String, String>,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .create_with(&ObjectId::process(host, name), Some(&ObjectId::host(host)), properties)
            .await?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    /// Sets properties on a host or process.
    pub async fn set_properties(
        &self,
        id: &ObjectId,
        properties: &BTreeMap<String, String>,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager.editor(&mut log)?.set_properties(id, properties)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    pub async fn set_process_enabled(
        &self,
        host: &str,
        name: &str,
        enabled: bool,
    ) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        self.manager
            .editor(&mut log)?
            .set_enabled(&ObjectId::process(host, name), enabled)?;
        self.manager.commit(&mut log, Intent::Constructive).await
    }

    /// Removes the named hosts together with their processes, in one
    /// transaction. Names that do not exist are ignored.
    pub async fn remove_hosts(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let staged = self
            .manager
            .editor(&mut log)?
            .delete_matching(ObjectKind::Host, |host| names.contains(&host.id().name()))
            .await?;
        info!("Removing {} hosts with {} records", names.len(), staged);
        self.manager.commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::MemoryConnector;
    use crate::commons::test::{connection, RecordingListener};
    use crate::model::ChangeKind;

    fn hosts() -> (HostManager, Arc<crate::authority::MemoryAuthority>) {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("hosts");
        let authority = connector.authority(&conn);
        let services = Arc::new(ServiceProxies::new(conn, connector));
        (HostManager::new(services, 16), authority)
    }

    #[tokio::test]
    async fn removing_hosts_cascades_to_processes() {
        let (manager, authority) = hosts();
        manager.add_host("alpha", BTreeMap::new()).await.unwrap();
        manager.add_process("alpha", "p1", BTreeMap::new()).await.unwrap();
        manager.add_host("beta", BTreeMap::new()).await.unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let _sub = manager.manager().subscribe_changes(recorder.clone());

        manager.remove_hosts(&["alpha"]).await.unwrap();

        let last = authority.transactions().pop().unwrap();
        assert_eq!(2, last.len());
        assert_eq!(&ObjectId::process("alpha", "p1"), last[0].target());
        assert_eq!(&ObjectId::host("alpha"), last[1].target());

        assert_eq!(vec![ChangeKind::Deleted, ChangeKind::Deleted], recorder.kinds());
        let remaining = manager.hosts().await.unwrap();
        assert_eq!(1, remaining.len());
    }

    #[tokio::test]
    async fn removing_nothing_still_marks_stale() {
        let (manager, authority) = hosts();
        manager.hosts().await.unwrap();
        assert!(!manager.manager().is_stale());

        let outcome = manager.remove_hosts(&["nowhere"]).await.unwrap();
        assert!(outcome.is_skipped());
        assert!(manager.manager().is_stale());
        assert_eq!(0, authority.submissions());
    }

    #[tokio::test]
    async fn process_events_carry_host_context() {
        let (manager, _authority) = hosts();
        manager.add_host("alpha", BTreeMap::new()).await.unwrap();
        let outcome = manager.add_process("alpha", "p1", BTreeMap::new()).await.unwrap();

        let event = &outcome.events()[0];
        assert_eq!(ChangeKind::New, event.kind());
        assert_eq!(&[ObjectId::host("alpha")], event.context());

        let processes = manager.processes("alpha").await.unwrap();
        assert_eq!(1, processes.len());
    }
}
