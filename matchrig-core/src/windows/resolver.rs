// File: matchrig-core/src/windows/resolver.rs
//
// Account-to-window resolution. Handles are never trusted across calls:
// every flow asks the resolver again and the resolver re-validates the
// owning process each time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use matchrig_common::models::{WindowHandle, WindowRect};
use crate::config::AppConfig;
use crate::os::{ProcessApi, WindowSystem};
use crate::registry::{ManagedAccount, RuntimeMap};
use crate::Error;

/// Ranks a candidate title for a given login. A retitled managed window
/// dominates; the stock client title is a weak fallback for manual starts.
fn score_title(title: &str, login: &str, tag: &str) -> i32 {
    let title_lower = title.to_lowercase();
    let mut score = 0;
    if !login.is_empty() && title_lower.contains(&login.to_lowercase()) {
        score += 100;
    }
    if title_lower.contains(&tag.to_lowercase()) {
        score += 40;
    }
    if title_lower.contains("counter-strike") || title_lower.contains("cs2") {
        score += 20;
    }
    if !title.is_empty() {
        score += 5;
    }
    score
}

/// Slot order for a set of window positions: ascending x, then y, then
/// input index. Returns indices into `positions`.
pub fn order(positions: &[(i32, i32)]) -> Vec<usize> {
    let mut slots: Vec<usize> = (0..positions.len()).collect();
    slots.sort_by_key(|&i| (positions[i].0, positions[i].1, i));
    slots
}

pub struct WindowResolver {
    windows: Arc<dyn WindowSystem>,
    process: Arc<dyn ProcessApi>,
    client_exe: String,
    title_tag: String,
}

impl WindowResolver {
    pub fn new(
        windows: Arc<dyn WindowSystem>,
        process: Arc<dyn ProcessApi>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            windows,
            process,
            client_exe: cfg.client_exe.to_lowercase(),
            title_tag: cfg.window_title_tag.clone(),
        }
    }

    fn is_client_process(&self, pid: u32) -> bool {
        pid != 0
            && self
                .process
                .process_name(pid)
                .map(|name| name == self.client_exe)
                .unwrap_or(false)
    }

    /// First enumerated top-level window of a process.
    fn main_window_for_pid(&self, pid: u32) -> Option<WindowHandle> {
        let infos = self.windows.enumerate_windows().ok()?;
        infos.into_iter().find(|w| w.pid == pid).map(|w| w.handle)
    }

    /// Largest window of a process; position breaks area ties.
    fn largest_window_for_pid(&self, pid: u32) -> Option<WindowHandle> {
        let infos = self.windows.enumerate_windows().ok()?;
        let mut candidates: Vec<_> = infos
            .into_iter()
            .filter(|w| w.pid == pid && w.rect.area() > 0)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|w| (-w.rect.area(), w.rect.left, w.rect.top));
        Some(candidates[0].handle)
    }

    fn validated_main_window(&self, account: &ManagedAccount) -> Option<WindowHandle> {
        if !account.is_valid(self.process.as_ref(), &self.client_exe) {
            return None;
        }
        let handle = self.main_window_for_pid(account.client_pid()?)?;
        if !self.windows.is_window(handle) {
            return None;
        }
        let owner_ok = self
            .windows
            .window_pid(handle)
            .map(|pid| self.is_client_process(pid))
            .unwrap_or(false);
        owner_ok.then_some(handle)
    }

    /// The window an account's client is showing right now, or `None` when
    /// the client process is gone or windowless.
    pub fn resolve(&self, account: &ManagedAccount) -> Option<WindowHandle> {
        if let Some(handle) = self.validated_main_window(account) {
            return Some(handle);
        }
        let pid = account.client_pid()?;
        if !self.is_client_process(pid) {
            return None;
        }
        self.largest_window_for_pid(pid)
    }

    /// `resolve` with a last-ditch fallback for windows whose process name
    /// check momentarily fails mid-transition.
    pub fn resolve_member(&self, account: &ManagedAccount) -> Option<WindowHandle> {
        if let Some(handle) = self.resolve(account) {
            return Some(handle);
        }
        self.validated_main_window(account)
    }

    /// Bounded retry search by pid score, falling back to a title-only scan
    /// for clients that were started outside the launcher.
    pub async fn find_for_login(
        &self,
        login: &str,
        pid: Option<u32>,
        retries: u32,
        delay: Duration,
    ) -> Option<WindowHandle> {
        for attempt in 1..=retries.max(1) {
            if let Some(handle) = self.find_once(login, pid) {
                return Some(handle);
            }
            debug!("[{}] window not found (attempt {}/{})", login, attempt, retries);
            tokio::time::sleep(delay).await;
        }
        None
    }

    fn find_once(&self, login: &str, pid: Option<u32>) -> Option<WindowHandle> {
        let infos = self.windows.enumerate_windows().ok()?;

        if let Some(pid) = pid {
            let mut scored: Vec<_> = infos
                .iter()
                .filter(|w| w.pid == pid)
                .map(|w| (score_title(&w.title, login, &self.title_tag), w.handle))
                .collect();
            if !scored.is_empty() {
                scored.sort_by_key(|(score, _)| -*score);
                return Some(scored[0].1);
            }
        }

        let login_lower = login.to_lowercase();
        infos
            .iter()
            .find(|w| {
                w.title.contains(&self.title_tag)
                    && w.title.to_lowercase().contains(&login_lower)
            })
            .map(|w| w.handle)
    }

    /// Every top-level window owned by a client process. Pids are the union
    /// of a live image-name scan and the persisted runtime mapping (re-read
    /// from disk, then validated against the process table), so clients
    /// started outside the launcher are covered too.
    pub fn all_client_windows(&self, runtime: &RuntimeMap) -> Result<Vec<WindowHandle>, Error> {
        runtime.reload();
        let mut pids = self.process.processes_matching(&self.client_exe);
        for pid in runtime.live_client_pids(self.process.as_ref(), &self.client_exe) {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }

        let mut handles = Vec::new();
        for info in self.windows.enumerate_windows()? {
            if pids.contains(&info.pid) && !handles.contains(&info.handle) {
                handles.push(info.handle);
            }
        }
        Ok(handles)
    }

    /// Accounts ordered by their window position, left to right (top to
    /// bottom on equal x, input order on full ties). Accounts without a
    /// window are skipped with a single warning.
    pub fn ordered_by_position(
        &self,
        accounts: &[Arc<ManagedAccount>],
    ) -> Vec<(Arc<ManagedAccount>, WindowHandle)> {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();

        for account in accounts {
            let Some(handle) = self.resolve(account) else {
                missing.push(account.login().to_string());
                continue;
            };
            let Ok(rect) = self.windows.window_rect(handle) else {
                missing.push(account.login().to_string());
                continue;
            };
            resolved.push((rect.left, rect.top, account.clone(), handle));
        }

        if !missing.is_empty() {
            warn!("accounts without a client window skipped: {}", missing.join(", "));
        }

        let positions: Vec<_> = resolved.iter().map(|r| (r.0, r.1)).collect();
        order(&positions)
            .into_iter()
            .map(|slot| (resolved[slot].2.clone(), resolved[slot].3))
            .collect()
    }

    /// The four leftmost windows as slots 1..4. Fails instead of degrading
    /// when fewer than four windows resolve or two slots share a handle.
    pub fn strict_four(
        &self,
        accounts: &[Arc<ManagedAccount>],
    ) -> Result<Vec<Arc<ManagedAccount>>, Error> {
        let ordered = self.ordered_by_position(accounts);
        if ordered.len() < 4 {
            return Err(Error::Layout(format!(
                "need at least 4 client windows, found {}",
                ordered.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(4);
        for (account, _) in ordered.into_iter().take(4) {
            let handle = self
                .resolve(&account)
                .filter(|h| self.windows.is_window(*h))
                .ok_or_else(|| {
                    Error::Layout(format!("no client window for {}", account.login()))
                })?;
            if !seen.insert(handle) {
                return Err(Error::Layout(
                    "duplicate window handle across the four slots".to_string(),
                ));
            }
            slots.push(account);
        }
        Ok(slots)
    }

    /// Checks that the given members' windows stand in exactly the given
    /// order on screen. Any unresolvable or shared window fails the check.
    pub fn strict_order_holds(&self, members: &[Arc<ManagedAccount>]) -> bool {
        let mut positions = Vec::with_capacity(members.len());
        let mut seen = HashSet::new();

        for member in members {
            let Some(handle) = self.resolve_member(member) else {
                return false;
            };
            if !self.windows.is_window(handle) || !seen.insert(handle) {
                return false;
            }
            let Ok(rect) = self.windows.window_rect(handle) else {
                return false;
            };
            positions.push((rect.left, rect.top));
        }

        // Members are in slot order exactly when the sort is the identity.
        order(&positions)
            .into_iter()
            .enumerate()
            .all(|(slot, i)| slot == i)
    }

    /// Window plus its current outer rect, for flows that click relative to
    /// the frame.
    pub fn window_with_rect(
        &self,
        account: &ManagedAccount,
    ) -> Option<(WindowHandle, WindowRect)> {
        let handle = self.resolve(account)?;
        let rect = self.windows.window_rect(handle).ok()?;
        Some((handle, rect))
    }
}
