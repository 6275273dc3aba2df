// File: matchrig-core/src/registry/mod.rs
//
// Process-wide account registry. Accounts are created once at startup from
// the credentials file joined with the secret records and live for the
// whole process; only their runtime state (status, process handles, match
// id) ever changes.

pub mod runtime_map;
pub mod secrets;

pub use runtime_map::{login_from_title, RuntimeMap};
pub use secrets::{build_accounts, load_credentials, SecretRecord, SecretStore};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use matchrig_common::models::{AccountRecord, PlayerStats, StatusColor};
use crate::config::AppConfig;
use crate::eventbus::EventBus;
use crate::os::{LaunchHandles, ProcessApi};
use crate::Error;

#[derive(Debug, Default)]
struct AccountState {
    status: Option<StatusColor>,
    handles: Option<LaunchHandles>,
    last_match_id: Option<String>,
    stats: Option<PlayerStats>,
}

/// One account plus its mutable runtime state. Shared by `Arc` across every
/// service; the state lock is held only for field reads/writes, never across
/// an await point.
pub struct ManagedAccount {
    pub record: AccountRecord,
    state: Mutex<AccountState>,
}

impl ManagedAccount {
    pub fn new(record: AccountRecord) -> Self {
        Self {
            record,
            state: Mutex::new(AccountState::default()),
        }
    }

    pub fn login(&self) -> &str {
        &self.record.login
    }

    pub fn login_lower(&self) -> String {
        self.record.login.to_lowercase()
    }

    pub fn status(&self) -> StatusColor {
        self.state.lock().status.unwrap_or(StatusColor::Idle)
    }

    fn set_status(&self, status: StatusColor) {
        self.state.lock().status = Some(status);
    }

    pub fn handles(&self) -> Option<LaunchHandles> {
        self.state.lock().handles
    }

    pub fn set_handles(&self, handles: LaunchHandles) {
        self.state.lock().handles = Some(handles);
    }

    pub fn clear_handles(&self) {
        self.state.lock().handles = None;
    }

    pub fn client_pid(&self) -> Option<u32> {
        self.state.lock().handles.and_then(|h| h.client_pid)
    }

    pub fn last_match_id(&self) -> Option<String> {
        self.state.lock().last_match_id.clone()
    }

    pub fn set_last_match_id(&self, id: impl Into<String>) {
        self.state.lock().last_match_id = Some(id.into());
    }

    pub fn clear_last_match_id(&self) {
        self.state.lock().last_match_id = None;
    }

    pub fn stats(&self) -> Option<PlayerStats> {
        self.state.lock().stats.clone()
    }

    pub fn set_stats(&self, stats: PlayerStats) {
        self.state.lock().stats = Some(stats);
    }

    /// A live pid pair with the right image name and parent linkage. This is
    /// the validity check every flow gates on before touching windows.
    pub fn is_valid(&self, process: &dyn ProcessApi, client_exe: &str) -> bool {
        let Some(handles) = self.handles() else {
            return false;
        };
        let Some(client_pid) = handles.client_pid else {
            return false;
        };
        if !process.pid_exists(handles.launcher_pid) || !process.pid_exists(client_pid) {
            return false;
        }
        let name_ok = process
            .process_name(client_pid)
            .map(|n| n == client_exe.to_lowercase())
            .unwrap_or(false);
        name_ok && process.parent_pid(client_pid) == Some(handles.launcher_pid)
    }
}

pub struct AccountRegistry {
    accounts: Mutex<HashMap<String, Arc<ManagedAccount>>>,
    order: Mutex<Vec<String>>,
    process: Arc<dyn ProcessApi>,
    event_bus: Arc<EventBus>,
    client_exe: String,
}

impl AccountRegistry {
    pub fn new(process: Arc<dyn ProcessApi>, event_bus: Arc<EventBus>, cfg: &AppConfig) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            process,
            event_bus,
            client_exe: cfg.client_exe.to_lowercase(),
        }
    }

    /// Loads accounts from the credentials file + secret records directory.
    pub fn load_from_disk(&self, cfg: &AppConfig, store: &SecretStore) -> Result<usize, Error> {
        let credentials = load_credentials(&cfg.credentials_path)?;
        let records = store.load_all();
        let accounts = build_accounts(credentials, records);
        let count = accounts.len();
        self.insert_all(accounts);
        info!("loaded {} accounts", count);
        Ok(count)
    }

    pub fn insert_all(&self, records: Vec<AccountRecord>) {
        let mut accounts = self.accounts.lock();
        let mut order = self.order.lock();
        for record in records {
            let key = record.login.to_lowercase();
            if accounts.contains_key(&key) {
                warn!("duplicate account login {:?} ignored", record.login);
                continue;
            }
            accounts.insert(key.clone(), Arc::new(ManagedAccount::new(record)));
            order.push(key);
        }
    }

    pub fn get(&self, login: &str) -> Option<Arc<ManagedAccount>> {
        self.accounts.lock().get(&login.to_lowercase()).cloned()
    }

    /// All accounts in credentials-file order.
    pub fn all(&self) -> Vec<Arc<ManagedAccount>> {
        let accounts = self.accounts.lock();
        self.order
            .lock()
            .iter()
            .filter_map(|key| accounts.get(key).cloned())
            .collect()
    }

    pub fn valid_accounts(&self) -> Vec<Arc<ManagedAccount>> {
        self.all()
            .into_iter()
            .filter(|a| a.is_valid(self.process.as_ref(), &self.client_exe))
            .collect()
    }

    pub fn count_valid(&self) -> usize {
        self.valid_accounts().len()
    }

    pub fn is_account_valid(&self, account: &ManagedAccount) -> bool {
        account.is_valid(self.process.as_ref(), &self.client_exe)
    }

    /// Updates an account's status and publishes the change on the bus.
    pub async fn set_status(&self, account: &ManagedAccount, status: StatusColor) {
        account.set_status(status);
        self.event_bus
            .publish_status(account.login(), status)
            .await;
    }

    /// Re-adopts clients that were already running before this process
    /// started, based on the persisted runtime mapping. Returns the adopted
    /// accounts so the caller can attach log watchers and fix their windows.
    pub async fn adopt_running(&self, runtime: &RuntimeMap) -> Vec<Arc<ManagedAccount>> {
        let mut adopted = Vec::new();
        for entry in runtime.entries() {
            let (Some(steam_pid), Some(client_pid)) = (entry.steam_pid, entry.client_pid) else {
                continue;
            };
            let Some(account) = self.get(&entry.login) else {
                continue;
            };
            account.set_handles(LaunchHandles {
                launcher_pid: steam_pid,
                client_pid: Some(client_pid),
            });
            if !self.is_account_valid(&account) {
                account.clear_handles();
                continue;
            }
            info!("[{}] adopted running client (pid {})", account.login(), client_pid);
            self.set_status(&account, StatusColor::Running).await;
            adopted.push(account);
        }
        adopted
    }

    /// Kills the launcher process only; the client is left to follow on its
    /// own. The account drops back to idle either way.
    pub async fn kill(&self, login: &str) -> Result<(), Error> {
        let account = self
            .get(login)
            .ok_or_else(|| Error::NotFound(format!("account {login}")))?;
        if let Some(handles) = account.handles() {
            if self.process.pid_exists(handles.launcher_pid) {
                info!("[{}] killing launcher pid {}", account.login(), handles.launcher_pid);
                self.process.kill(handles.launcher_pid)?;
            }
        }
        account.clear_handles();
        self.set_status(&account, StatusColor::Idle).await;
        Ok(())
    }

    pub async fn kill_all(&self) {
        for account in self.all() {
            if let Err(e) = self.kill(account.login()).await {
                warn!("[{}] kill failed: {}", account.login(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::MatchEvent;
    use crate::os::MockProcessApi;

    fn test_registry(process: MockProcessApi) -> (AccountRegistry, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let cfg = AppConfig::default();
        let registry = AccountRegistry::new(Arc::new(process), bus.clone(), &cfg);
        (registry, bus)
    }

    fn record(login: &str) -> AccountRecord {
        AccountRecord::new(login, "pw", 0)
    }

    #[tokio::test]
    async fn validity_needs_live_pids_name_and_parent() {
        let mut process = MockProcessApi::new();
        process.expect_pid_exists().returning(|_| true);
        process
            .expect_process_name()
            .returning(|_| Some("cs2.exe".to_string()));
        process.expect_parent_pid().returning(|_| Some(10));

        let account = ManagedAccount::new(record("alpha"));
        assert!(!account.is_valid(&process, "cs2.exe"));

        account.set_handles(LaunchHandles {
            launcher_pid: 10,
            client_pid: Some(20),
        });
        assert!(account.is_valid(&process, "cs2.exe"));

        // Wrong parent linkage invalidates.
        account.set_handles(LaunchHandles {
            launcher_pid: 99,
            client_pid: Some(20),
        });
        assert!(!account.is_valid(&process, "cs2.exe"));
    }

    #[tokio::test]
    async fn status_change_is_published_on_the_bus() {
        let (registry, bus) = test_registry(MockProcessApi::new());
        registry.insert_all(vec![record("alpha")]);
        let mut rx = bus.subscribe(None).await;

        let account = registry.get("ALPHA").unwrap();
        registry.set_status(&account, StatusColor::Queued).await;

        match rx.recv().await {
            Some(MatchEvent::AccountStatusChanged { login, status, .. }) => {
                assert_eq!(login, "alpha");
                assert_eq!(status, StatusColor::Queued);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn adoption_validates_pids_before_marking_running() {
        let mut process = MockProcessApi::new();
        // alpha's pids are alive and linked, bravo's client is gone.
        process.expect_pid_exists().returning(|pid| pid != 40);
        process
            .expect_process_name()
            .returning(|_| Some("cs2.exe".to_string()));
        process.expect_parent_pid().returning(|pid| match pid {
            20 => Some(10),
            _ => None,
        });

        let (registry, _bus) = test_registry(process);
        registry.insert_all(vec![record("alpha"), record("bravo")]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(
            &path,
            r#"[{"login":"alpha","SteamPid":10,"CS2Pid":20},
               {"login":"bravo","SteamPid":30,"CS2Pid":40}]"#,
        )
        .unwrap();
        let runtime = RuntimeMap::load(path);

        let adopted = registry.adopt_running(&runtime).await;
        assert_eq!(adopted.len(), 1);
        assert_eq!(adopted[0].login(), "alpha");
        assert_eq!(adopted[0].status(), StatusColor::Running);
        assert_eq!(registry.get("bravo").unwrap().status(), StatusColor::Idle);
        assert!(registry.get("bravo").unwrap().handles().is_none());
    }

    #[tokio::test]
    async fn all_preserves_insertion_order_and_skips_duplicates() {
        let (registry, _bus) = test_registry(MockProcessApi::new());
        registry.insert_all(vec![record("charlie"), record("alpha"), record("Alpha")]);
        let logins: Vec<_> = registry.all().iter().map(|a| a.login().to_string()).collect();
        assert_eq!(logins, vec!["charlie".to_string(), "alpha".to_string()]);
    }
}
