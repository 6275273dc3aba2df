// File: matchrig-core/src/logwatch/mod.rs
//
// Per-account client log tailing. Each managed client writes a console log
// named after its login; the watcher finds the newest copy across the known
// roots, tails it from the end, and reacts to the two lines we care about:
// the renderer-ready marker and matchmaking assignment ids.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::eventbus::EventBus;
use crate::registry::ManagedAccount;
use crate::windows::{WindowArranger, WindowResolver};

/// Printed once the client's renderer is up; the window frame is final
/// after this line, so it is the moment to repair the border.
const RENDERER_READY_MARKER: &str = "Scratch RT Allocations:";

/// How long to keep looking for a log file that does not exist yet.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DISCOVERY_PACE: Duration = Duration::from_secs(1);
const TAIL_PACE: Duration = Duration::from_millis(100);

static MATCH_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"match_id=(\d+)").unwrap());

const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Compact form the ids are compared in. Raw ids are long decimals; the
/// shorter form keeps logs and titles readable.
pub fn to_base62(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE62_ALPHABET[(n % 62) as usize]);
        n /= 62;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Pulls a matchmaking id out of a log line, already base62-compacted.
pub fn extract_match_id(line: &str) -> Option<String> {
    let caps = MATCH_ID_RE.captures(line)?;
    let raw: u64 = caps.get(1)?.as_str().parse().ok()?;
    Some(to_base62(raw))
}

/// Newest file with the given name anywhere under the given roots.
pub fn find_latest_file(roots: &[PathBuf], filename: &str) -> Option<PathBuf> {
    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;

    for root in roots {
        if !root.exists() {
            continue;
        }
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.file_name().map(|n| n == filename).unwrap_or(false) {
                    let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) else {
                        continue;
                    };
                    if latest.as_ref().map(|(t, _)| mtime > *t).unwrap_or(true) {
                        latest = Some((mtime, path));
                    }
                }
            }
        }
    }

    latest.map(|(_, path)| path)
}

pub struct LogWatchService {
    roots: Vec<PathBuf>,
    resolver: Arc<WindowResolver>,
    arranger: Arc<WindowArranger>,
    event_bus: Arc<EventBus>,
}

impl LogWatchService {
    pub fn new(
        cfg: &AppConfig,
        resolver: Arc<WindowResolver>,
        arranger: Arc<WindowArranger>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            roots: cfg.log_roots(),
            resolver,
            arranger,
            event_bus,
        }
    }

    /// Starts a tail task for one account. The task finds the account's log
    /// (waiting for it to appear if the client is still starting), then
    /// follows appended lines until shutdown.
    pub fn spawn(self: &Arc<Self>, account: Arc<ManagedAccount>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let filename = format!("{}.log", account.login());
            let Some(path) = service.discover(&filename).await else {
                warn!("[{}] log file {:?} never appeared", account.login(), filename);
                return;
            };
            info!("[{}] tailing {}", account.login(), path.display());
            service.tail(&account, &path).await;
        })
    }

    async fn discover(&self, filename: &str) -> Option<PathBuf> {
        let deadline = tokio::time::Instant::now() + DISCOVERY_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.event_bus.is_shutdown() {
                return None;
            }
            if let Some(path) = find_latest_file(&self.roots, filename) {
                // The client holds the file exclusively for a moment after
                // creating it; keep polling until it opens.
                if std::fs::File::open(&path).is_ok() {
                    return Some(path);
                }
            }
            tokio::time::sleep(DISCOVERY_PACE).await;
        }
        None
    }

    async fn tail(&self, account: &ManagedAccount, path: &Path) {
        let Ok(file) = tokio::fs::File::open(path).await else {
            warn!("[{}] cannot open {}", account.login(), path.display());
            return;
        };
        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::End(0)).await.is_err() {
            return;
        }

        let mut line = String::new();
        loop {
            if self.event_bus.is_shutdown() {
                return;
            }
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => tokio::time::sleep(TAIL_PACE).await,
                Ok(_) => self.handle_line(account, &line),
                Err(e) => {
                    warn!("[{}] log read failed: {}", account.login(), e);
                    return;
                }
            }
        }
    }

    fn handle_line(&self, account: &ManagedAccount, line: &str) {
        if line.contains(RENDERER_READY_MARKER) {
            if let Some(handle) = self.resolver.resolve(account) {
                self.arranger.fix_frame(handle);
            }
            return;
        }

        if let Some(id) = extract_match_id(line) {
            debug!("[{}] match id {}", account.login(), id);
            account.set_last_match_id(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use matchrig_common::models::{AccountRecord, WindowRect};
    use crate::os::{MockProcessApi, MockWindowSystem};

    fn service_with_mocks(roots: Vec<PathBuf>) -> Arc<LogWatchService> {
        let cfg = AppConfig::default();
        let windows: Arc<MockWindowSystem> = Arc::new(MockWindowSystem::new());
        let process: Arc<MockProcessApi> = Arc::new(MockProcessApi::new());
        let resolver = Arc::new(WindowResolver::new(
            windows.clone(),
            process.clone(),
            &cfg,
        ));
        let arranger = Arc::new(WindowArranger::new(windows, process, &cfg));
        Arc::new(LogWatchService {
            roots,
            resolver,
            arranger,
            event_bus: Arc::new(EventBus::new()),
        })
    }

    #[test]
    fn base62_uses_full_alphabet() {
        assert_eq!(to_base62(0), "0");
        assert_eq!(to_base62(9), "9");
        assert_eq!(to_base62(10), "A");
        assert_eq!(to_base62(35), "Z");
        assert_eq!(to_base62(36), "a");
        assert_eq!(to_base62(61), "z");
        assert_eq!(to_base62(62), "10");
        assert_eq!(to_base62(3843), "zz");
        assert_eq!(to_base62(3844), "100");
    }

    #[test]
    fn match_id_is_extracted_and_compacted() {
        assert_eq!(
            extract_match_id("[MM] assigned match_id=3843 server=ams1"),
            Some("zz".to_string())
        );
        assert_eq!(extract_match_id("match_id=0"), Some("0".to_string()));
        assert_eq!(extract_match_id("no ids here"), None);
        assert_eq!(extract_match_id("match_id=abc"), None);
    }

    #[test]
    fn latest_file_wins_across_roots() {
        let dir = tempfile::tempdir().unwrap();
        let old_dir = dir.path().join("old/nested");
        let new_dir = dir.path().join("new");
        std::fs::create_dir_all(&old_dir).unwrap();
        std::fs::create_dir_all(&new_dir).unwrap();

        std::fs::write(old_dir.join("alpha.log"), "old").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(new_dir.join("alpha.log"), "new").unwrap();

        let found = find_latest_file(&[dir.path().to_path_buf()], "alpha.log").unwrap();
        assert_eq!(found, new_dir.join("alpha.log"));

        assert_eq!(
            find_latest_file(&[dir.path().to_path_buf()], "missing.log"),
            None
        );
    }

    #[test]
    fn match_id_line_updates_account() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_mocks(vec![dir.path().to_path_buf()]);
        let account = ManagedAccount::new(AccountRecord::new("alpha", "pw", 0));

        service.handle_line(&account, "connect ok match_id=100 lane=7");
        assert_eq!(account.last_match_id(), Some("1c".to_string()));

        // Lines without an id leave the stored value alone.
        service.handle_line(&account, "heartbeat");
        assert_eq!(account.last_match_id(), Some("1c".to_string()));
    }

    #[tokio::test]
    async fn tail_picks_up_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("alpha.log");
        std::fs::write(&log_path, "boot line match_id=1\n").unwrap();

        let service = service_with_mocks(vec![dir.path().to_path_buf()]);
        let account = Arc::new(ManagedAccount::new(AccountRecord::new("alpha", "pw", 0)));
        let handle = service.spawn(account.clone());

        // The pre-existing line is behind the tail point and must not count.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(account.last_match_id(), None);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        writeln!(file, "assigned match_id=62").unwrap();
        file.flush().unwrap();

        let mut seen = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Some(id) = account.last_match_id() {
                seen = Some(id);
                break;
            }
        }
        assert_eq!(seen, Some("10".to_string()));

        service.event_bus.shutdown();
        let _ = handle.await;
    }

    #[test]
    fn renderer_marker_triggers_frame_fix() {
        let cfg = AppConfig::default();

        let mut windows = MockWindowSystem::new();
        windows.expect_enumerate_windows().returning(|| {
            Ok(vec![matchrig_common::models::WindowInfo {
                handle: matchrig_common::models::WindowHandle(5),
                pid: 11,
                title: "[MATCHRIG] alpha".into(),
                rect: WindowRect::new(0, 0, 399, 310),
            }])
        });
        windows.expect_is_window().returning(|_| true);
        windows.expect_window_pid().returning(|_| Some(11));
        windows
            .expect_window_rect()
            .returning(|_| Ok(WindowRect::new(0, 0, 399, 310)));
        windows
            .expect_client_rect()
            .returning(|_| Ok(WindowRect::new(0, 0, 383, 280)));
        windows
            .expect_move_window()
            .withf(|_, _, _, w, h| *w == 383 && *h == 280)
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let mut process = MockProcessApi::new();
        process.expect_pid_exists().returning(|_| true);
        process
            .expect_process_name()
            .returning(|_| Some("cs2.exe".to_string()));
        process.expect_parent_pid().returning(|_| Some(10));

        let windows: Arc<MockWindowSystem> = Arc::new(windows);
        let process: Arc<MockProcessApi> = Arc::new(process);
        let resolver = Arc::new(WindowResolver::new(windows.clone(), process.clone(), &cfg));
        let arranger = Arc::new(WindowArranger::new(windows, process, &cfg));
        let service = LogWatchService {
            roots: vec![],
            resolver,
            arranger,
            event_bus: Arc::new(EventBus::new()),
        };

        let account = ManagedAccount::new(AccountRecord::new("alpha", "pw", 0));
        account.set_handles(crate::os::LaunchHandles {
            launcher_pid: 10,
            client_pid: Some(11),
        });

        service.handle_line(&account, "Scratch RT Allocations: 128mb");
    }
}
