use std::sync::Arc;
use std::time::Duration;

use crate::commons::ConsoleResult;
use crate::edit::ActionLog;
use crate::model::{ConfigObject, Domain, ObjectId};
use crate::registry::ServiceProxies;

use super::{CommitOutcome, CommitPolicy, Intent, Manager, RefreshTimer};

//------------ QueryManager --------------------------------------------------

/// Lists the queries running on the server, refreshed on a short period.
pub struct QueryManager {
    timer: RefreshTimer,
}

impl QueryManager {
    pub const POLICY: CommitPolicy = CommitPolicy::MARK_STALE;

    pub fn new(
        services: Arc<ServiceProxies>,
        period: Duration,
        auto_refresh: bool,
        event_capacity: usize,
    ) -> Self {
        let manager = Arc::new(Manager::new(Domain::Queries, services, Self::POLICY, event_capacity));
        QueryManager {
            timer: RefreshTimer::new(manager, period, auto_refresh),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        self.timer.manager()
    }

    pub fn timer(&self) -> &RefreshTimer {
        &self.timer
    }

    pub async fn queries(&self) -> ConsoleResult<Vec<ConfigObject>> {
        self.manager().objects().await
    }

    /// The running queries of one session.
    pub async fn session_queries(&self, session: &str) -> ConsoleResult<Vec<ConfigObject>> {
        let session = ObjectId::session(session);
        Ok(self
            .queries()
            .await?
            .into_iter()
            .filter(|q| q.parent() == Some(&session))
            .collect())
    }

    pub async fn cancel_queries(&self, names: &[&str]) -> ConsoleResult<CommitOutcome> {
        let mut log = ActionLog::new();
        let mut editor = self.manager().editor(&mut log)?;
        for name in names {
            editor.delete(&ObjectId::query(*name))?;
        }
        self.manager().commit(&mut log, Intent::Destructive).await
    }
}

//------------ Tests ---------------------------------------------------------
