//! Periodic refresh for managers of fast changing runtime state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::Manager;

//------------ TimerFire -----------------------------------------------------

/// What a single firing of the timer did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerFire {
    /// The manager was refreshed.
    Refreshed,

    /// Something was in flight for the manager, the firing was dropped.
    Busy,

    /// The refresh failed. The error has been logged and the manager is
    /// stale.
    Failed,
}

impl fmt::Display for TimerFire {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimerFire::Refreshed => write!(f, "refreshed"),
            TimerFire::Busy => write!(f, "busy"),
            TimerFire::Failed => write!(f, "failed"),
        }
    }
}

//------------ RefreshTimer --------------------------------------------------

/// Refreshes a manager periodically.
///
/// The first refresh happens one period after starting. A firing that finds
/// a commit or refresh in flight is dropped rather than queued, and firings
/// missed while a slow refresh was running are skipped.
///
/// The background task only holds a weak reference to the manager, and is
/// aborted when the timer is stopped or dropped.
pub struct RefreshTimer {
    manager: Arc<Manager>,
    auto_refresh: bool,
    period: Mutex<Duration>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTimer {
    /// Creates a stopped timer. With `auto_refresh` off, [`start`] does
    /// nothing and the manager is only refreshed on access.
    ///
    /// [`start`]: RefreshTimer::start
    pub fn new(manager: Arc<Manager>, period: Duration, auto_refresh: bool) -> Self {
        RefreshTimer {
            manager,
            auto_refresh,
            period: Mutex::new(usable(period)),
            task: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn period(&self) -> Duration {
        *self.period.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts the timer, unless it is running already or auto refresh is
    /// off. Needs to be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.auto_refresh {
            debug!("Auto refresh disabled, not starting timer for {}", self.manager.domain());
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "Cannot start refresh timer for {} outside of a runtime",
                    self.manager.domain()
                );
                return;
            }
        };

        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let period = self.period();
        let manager = Arc::downgrade(&self.manager);
        debug!(
            "Starting refresh timer for {} every {}s",
            self.manager.domain(),
            period.as_secs_f64()
        );
        *task = Some(handle.spawn(run(manager, period)));
    }

    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            debug!("Stopping refresh timer for {}", self.manager.domain());
            task.abort();
        }
    }

    /// Changes the period. A running timer is restarted, so that the next
    /// firing is one new period from now.
    pub fn set_period(&self, period: Duration) {
        *self.period.lock().unwrap_or_else(PoisonError::into_inner) = usable(period);
        if self.is_running() {
            self.stop();
            self.start();
        }
    }

    /// Fires once, right now.
    pub async fn fire(&self) -> TimerFire {
        self.manager.refresh_if_idle().await
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(manager: Weak<Manager>, period: Duration) {
    let mut ticks = time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticks.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let fire = manager.refresh_if_idle().await;
        debug!("Timed refresh of {}: {}", manager.domain(), fire);
    }
}

// Tokio intervals panic on a zero period.
fn usable(period: Duration) -> Duration {
    period.max(Duration::from_millis(1))
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{MemoryAuthority, MemoryConnector};
    use crate::commons::test::connection;
    use crate::manager::CommitPolicy;
    use crate::model::Domain;
    use crate::registry::ServiceProxies;

    fn timer(period: Duration, auto_refresh: bool) -> (RefreshTimer, Arc<MemoryAuthority>) {
        let connector = Arc::new(MemoryConnector::new());
        let conn = connection("timed");
        let authority = connector.authority(&conn);
        let services = Arc::new(ServiceProxies::new(conn, connector));
        let manager = Arc::new(Manager::new(Domain::Queries, services, CommitPolicy::MARK_STALE, 8));
        (RefreshTimer::new(manager, period, auto_refresh), authority)
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_every_period() {
        let (timer, authority) = timer(Duration::from_secs(5), true);
        timer.start();
        assert!(timer.is_running());

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(0, authority.list_calls());

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(1, authority.list_calls());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(2, authority.list_calls());

        timer.stop();
        assert!(!timer.is_running());
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(2, authority.list_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_manager_drops_firings() {
        let (timer, authority) = timer(Duration::from_secs(5), true);
        let guard = timer.manager().busy().await;
        timer.start();

        time::sleep(Duration::from_secs(16)).await;
        assert_eq!(0, authority.list_calls());

        drop(guard);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(1, authority.list_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn set_period_restarts() {
        let (timer, authority) = timer(Duration::from_secs(60), true);
        timer.start();
        timer.set_period(Duration::from_secs(2));
        assert_eq!(Duration::from_secs(2), timer.period());
        assert!(timer.is_running());

        time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(1, authority.list_calls());
    }

    #[tokio::test]
    async fn disabled_auto_refresh_does_not_start() {
        let (timer, _authority) = timer(Duration::from_secs(5), false);
        timer.start();
        assert!(!timer.is_running());
        assert_eq!(TimerFire::Refreshed, timer.fire().await);
    }

    #[test]
    fn start_outside_runtime_is_ignored() {
        let (timer, _authority) = timer(Duration::from_secs(5), true);
        timer.start();
        assert!(!timer.is_running());
    }
}
