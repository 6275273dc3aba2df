// File: matchrig-core/src/registry/runtime_map.rs
//
// The persisted login -> pid mapping written by the launcher. This side only
// ever reads it; `reload` merges the file over the in-memory state so titles
// synced from live windows survive a stale file.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{info, warn};

use matchrig_common::models::RuntimeEntry;
use crate::os::{ProcessApi, WindowSystem};

/// Extracts the login from a managed window title ("<tag> <login>").
pub fn login_from_title<'a>(title: &'a str, tag: &str) -> Option<&'a str> {
    let rest = title.strip_prefix(tag)?.trim();
    (!rest.is_empty()).then_some(rest)
}

pub struct RuntimeMap {
    path: PathBuf,
    entries: Mutex<HashMap<String, RuntimeEntry>>,
}

impl RuntimeMap {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let map = Self {
            path: path.into(),
            entries: Mutex::new(HashMap::new()),
        };
        map.reload();
        map
    }

    fn read_file(&self) -> Vec<RuntimeEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<RuntimeEntry>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("runtime mapping {:?} unparseable: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Re-reads the file and merges it over the in-memory mapping.
    pub fn reload(&self) {
        let fresh = self.read_file();
        if fresh.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        for entry in fresh {
            entries.insert(entry.login.to_lowercase(), entry);
        }
        info!("runtime mapping loaded: {} accounts", entries.len());
    }

    pub fn entry(&self, login: &str) -> Option<RuntimeEntry> {
        self.entries.lock().get(&login.to_lowercase()).cloned()
    }

    pub fn client_pid(&self, login: &str) -> Option<u32> {
        self.entry(login).and_then(|e| e.client_pid)
    }

    pub fn entries(&self) -> Vec<RuntimeEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Scans visible window titles for the managed tag and records the
    /// owning pid per login. Windows retitled by hand still resolve this way
    /// even when the file on disk is stale.
    pub fn sync_from_titles(&self, windows: &dyn WindowSystem, tag: &str) {
        let infos = match windows.enumerate_windows() {
            Ok(infos) => infos,
            Err(e) => {
                warn!("window scan for title sync failed: {}", e);
                return;
            }
        };
        let mut entries = self.entries.lock();
        for info in infos {
            if !info.title.contains(tag) {
                continue;
            }
            if let Some(login) = login_from_title(&info.title, tag) {
                let entry = entries
                    .entry(login.to_lowercase())
                    .or_insert_with(|| RuntimeEntry {
                        login: login.to_string(),
                        steam_pid: None,
                        client_pid: None,
                    });
                entry.client_pid = Some(info.pid);
            }
        }
    }

    /// Logins whose recorded client pid is alive and still looks like the
    /// managed game client.
    pub fn live_logins(&self, process: &dyn ProcessApi, client_fragment: &str) -> Vec<String> {
        self.entries
            .lock()
            .values()
            .filter(|e| match e.client_pid {
                Some(pid) => {
                    process.pid_exists(pid)
                        && process
                            .process_name(pid)
                            .map(|n| n.contains(client_fragment))
                            .unwrap_or(false)
                }
                None => false,
            })
            .map(|e| e.login.clone())
            .collect()
    }

    /// Live-validated client pids from the mapping, for window scans.
    pub fn live_client_pids(&self, process: &dyn ProcessApi, client_fragment: &str) -> Vec<u32> {
        self.entries
            .lock()
            .values()
            .filter_map(|e| e.client_pid)
            .filter(|&pid| {
                process.pid_exists(pid)
                    && process
                        .process_name(pid)
                        .map(|n| n.contains(client_fragment))
                        .unwrap_or(false)
            })
            .collect()
    }
}
