// File: matchrig-core/src/launch/mod.rs
//
// Serialized launch scheduler. Accounts are queued and started strictly one
// at a time by a single worker; batches get extra spacing between accounts
// so a burst of logins does not trip the account provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use matchrig_common::Error;
use matchrig_common::models::StatusColor;

use crate::config::AppConfig;
use crate::eventbus::{EventBus, MatchEvent};
use crate::logwatch::LogWatchService;
use crate::os::GameLauncher;
use crate::registry::{AccountRegistry, ManagedAccount};

struct QueueState {
    pending: HashSet<String>,
    batch_remaining: usize,
}

pub struct LaunchQueue {
    registry: Arc<AccountRegistry>,
    launcher: Arc<dyn GameLauncher>,
    logwatch: Arc<LogWatchService>,
    event_bus: Arc<EventBus>,
    tx: mpsc::UnboundedSender<Arc<ManagedAccount>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<ManagedAccount>>>>,
    state: Mutex<QueueState>,
    post_launch_delay: Duration,
    inter_account_delay: Duration,
}

impl LaunchQueue {
    pub fn new(
        registry: Arc<AccountRegistry>,
        launcher: Arc<dyn GameLauncher>,
        logwatch: Arc<LogWatchService>,
        event_bus: Arc<EventBus>,
        cfg: &AppConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry,
            launcher,
            logwatch,
            event_bus,
            tx,
            rx: Mutex::new(Some(rx)),
            state: Mutex::new(QueueState {
                pending: HashSet::new(),
                batch_remaining: 0,
            }),
            post_launch_delay: Duration::from_secs(cfg.post_launch_delay_secs),
            inter_account_delay: Duration::from_secs(cfg.inter_account_delay_secs),
        }
    }

    /// Queues one account for launch. Already-running and already-queued
    /// accounts are skipped (returning false), everything else is marked
    /// queued and handed to the worker.
    pub async fn enqueue(&self, login: &str) -> Result<bool, Error> {
        let Some(account) = self.registry.get(login) else {
            return Err(Error::NotFound(format!("account {}", login)));
        };
        if self.registry.is_account_valid(&account) {
            info!("[{}] already running, launch skipped", account.login());
            return Ok(false);
        }
        {
            let mut state = self.state.lock();
            if !state.pending.insert(account.login_lower()) {
                info!("[{}] already queued, launch skipped", account.login());
                return Ok(false);
            }
        }
        self.registry.set_status(&account, StatusColor::Queued).await;
        if self.tx.send(account).is_err() {
            return Err(Error::Launch("launch worker is gone".into()));
        }
        Ok(true)
    }

    /// Arms the batch counter; the worker inserts the inter-account delay
    /// while it is positive.
    pub fn begin_batch(&self, count: usize) {
        self.state.lock().batch_remaining = count;
    }

    /// Queues a whole selection. The batch counter is armed up front and
    /// trimmed back by however many logins were skipped, so pacing matches
    /// what actually entered the queue.
    pub async fn enqueue_batch(&self, logins: &[String]) -> usize {
        self.begin_batch(logins.len());
        let mut accepted = 0;
        for login in logins {
            match self.enqueue(login).await {
                Ok(true) => accepted += 1,
                Ok(false) => {}
                Err(e) => warn!("[{}] not queued: {}", login, e),
            }
        }
        let skipped = logins.len() - accepted;
        if skipped > 0 {
            let mut state = self.state.lock();
            state.batch_remaining = state.batch_remaining.saturating_sub(skipped);
        }
        accepted
    }

    /// Starts the single worker task. The receiver can only be taken once;
    /// a second call logs and does nothing.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let Some(mut rx) = queue.rx.lock().take() else {
                warn!("launch worker already running");
                return;
            };
            let mut shutdown_rx = queue.event_bus.shutdown_rx.clone();
            loop {
                tokio::select! {
                    maybe_account = rx.recv() => {
                        match maybe_account {
                            Some(account) => queue.process_one(account).await,
                            None => break,
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("launch worker stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn process_one(&self, account: Arc<ManagedAccount>) {
        let login = account.login().to_string();
        self.registry.set_status(&account, StatusColor::Launching).await;

        let mut success = false;
        match self.launcher.start(&account.record).await {
            Ok(handles) => {
                account.set_handles(handles);
                tokio::time::sleep(self.post_launch_delay).await;
                if self.registry.is_account_valid(&account) {
                    self.registry.set_status(&account, StatusColor::Running).await;
                    self.logwatch.spawn(account.clone());
                    info!("[{}] client up", login);
                    success = true;
                } else {
                    warn!("[{}] client not alive after launch", login);
                    self.registry.set_status(&account, StatusColor::Error).await;
                }
            }
            Err(e) => {
                error!("[{}] launch failed: {}", login, e);
                if let Err(kill_err) = self.registry.kill(&login).await {
                    warn!("[{}] cleanup kill failed: {}", login, kill_err);
                }
                self.registry.set_status(&account, StatusColor::Error).await;
            }
        }

        self.event_bus
            .publish(MatchEvent::LaunchFinished { login, success })
            .await;

        let remaining = {
            let mut state = self.state.lock();
            state.pending.remove(&account.login_lower());
            state.batch_remaining = state.batch_remaining.saturating_sub(1);
            state.batch_remaining
        };
        if remaining > 0 {
            tokio::time::sleep(self.inter_account_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::MockProcessApi;
    use crate::test_utils::FakeLauncher;
    use crate::windows::{WindowArranger, WindowResolver};
    use matchrig_common::models::AccountRecord;

    fn queue_with_accounts(logins: &[&str]) -> Arc<LaunchQueue> {
        let cfg = AppConfig::default();
        let process: Arc<dyn crate::os::ProcessApi> = Arc::new(MockProcessApi::new());
        let windows: Arc<dyn crate::os::WindowSystem> =
            Arc::new(crate::os::MockWindowSystem::new());
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(AccountRegistry::new(process.clone(), bus.clone(), &cfg));
        registry.insert_all(
            logins
                .iter()
                .map(|l| AccountRecord::new(*l, "pw", 76561198000000001))
                .collect(),
        );
        let resolver = Arc::new(WindowResolver::new(windows.clone(), process.clone(), &cfg));
        let arranger = Arc::new(WindowArranger::new(windows, process, &cfg));
        let logwatch = Arc::new(LogWatchService::new(&cfg, resolver, arranger, bus.clone()));
        Arc::new(LaunchQueue::new(
            registry,
            Arc::new(FakeLauncher::new()),
            logwatch,
            bus,
            &cfg,
        ))
    }

    #[tokio::test]
    async fn unknown_login_is_an_error() {
        let queue = queue_with_accounts(&[]);
        assert!(queue.enqueue("ghost").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_skipped() {
        let queue = queue_with_accounts(&["alpha"]);
        assert!(queue.enqueue("alpha").await.unwrap());
        assert!(!queue.enqueue("alpha").await.unwrap());
        assert_eq!(queue.state.lock().pending.len(), 1);
    }

    #[tokio::test]
    async fn batch_counter_ignores_skipped_logins() {
        let queue = queue_with_accounts(&["alpha", "bravo"]);
        let accepted = queue
            .enqueue_batch(&["alpha".into(), "alpha".into(), "bravo".into()])
            .await;
        assert_eq!(accepted, 2);
        assert_eq!(queue.state.lock().batch_remaining, 2);
    }
}
