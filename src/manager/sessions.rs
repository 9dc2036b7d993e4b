use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectKind};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager, RefreshTimer};

//------------ SessionManager ------------------------------------------------

/// Lists the sessions open on the server. Sessions come and go without
/// going through this console, so the cache is refreshed periodically.
pub struct SessionManager {
    timer: RefreshTimer,
}

impl SessionManager {
    pub const POLICY: CommitPolicy = CommitPolicy::MARK_STALE;

    pub fn new(
        services: Arc<ServiceProxies>,
        period: Duration,
        auto_refresh: bool,
        event_capacity: usize,
    ) -> Self {
        let manager = Arc::new(Manager::new(Domain::Sessions, services, Self::POLICY, event_capacity));
        SessionManager {
            timer: RefreshTimer::new(manager, period, auto_refresh),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        self.timer.manager()
    }

    pub fn timer(&self) -> &RefreshTimer {
        &self.timer
    }

    pub async fn sessions(&self) -> ConsoleResult<Vec<ConfigObject>> {
        self.manager().objects().await
    }

    /// Terminates the named sessions in one transaction. Their queries are
    /// cancelled first.
    pub async fn terminate_sessions(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let staged = self
            .manager()
            .editor(&mut log)?
            .delete_matching(ObjectKind::Session, |session| names.contains(&session.id().name()))
            .await?;
        info!("Terminating {} sessions with {} records", names.len(), staged);
        self.manager().commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::MemoryConnector;
    use crate::commons::test::connection;
    use crate::model::{ChangeKind, ObjectId};

    #[tokio::test]
    async fn terminating_cancels_queries_first() {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("sessions");
        let authority = connector.authority(&conn);
        let s1 = ObjectId::session("s1");
        authority.seed(ConfigObject::new(s1.clone(), None));
        authority.seed(ConfigObject::new(ObjectId::session("s2"), None));
        authority.seed(ConfigObject::new(ObjectId::query("q1"), Some(s1.clone())));

        let manager = SessionManager::new(
            Arc::new(ServiceProxies::new(conn, connector)),
            Duration::from_secs(10),
            false,
            16,
        );
        assert_eq!(2, manager.sessions().await.unwrap().len());

        let outcome = manager.terminate_sessions(&["s1"]).await.unwrap();
        let events = outcome.events();
        assert_eq!(2, events.len());
        assert_eq!(Some(&ObjectId::query("q1")), events[0].target());
        assert_eq!(Domain::Queries, events[0].domain());
        assert_eq!(Some(&s1), events[1].target());
        assert_eq!(ChangeKind::Deleted, events[1].kind());
        assert!(events[1].object().is_some());

        assert_eq!(1, manager.sessions().await.unwrap().len());
        assert!(authority.get(&ObjectId::query("q1")).is_none());
    }
}
