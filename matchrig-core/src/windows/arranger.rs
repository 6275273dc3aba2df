// File: matchrig-core/src/windows/arranger.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use matchrig_common::models::WindowHandle;
use crate::cancel::StopSignal;
use crate::config::AppConfig;
use crate::os::{ProcessApi, WindowSystem};
use crate::registry::ManagedAccount;
use crate::windows::{focus_window, WindowResolver};

/// Tiles, lifts and repairs the fleet's client windows. Layout is a single
/// row at the top of the screen, one fixed-size tile per account.
pub struct WindowArranger {
    windows: Arc<dyn WindowSystem>,
    process: Arc<dyn ProcessApi>,
    tile_width: i32,
    tile_height: i32,
    title_tag: String,
    client_exe: String,
}

impl WindowArranger {
    pub fn new(
        windows: Arc<dyn WindowSystem>,
        process: Arc<dyn ProcessApi>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            windows,
            process,
            tile_width: cfg.tile_width,
            tile_height: cfg.tile_height,
            title_tag: cfg.window_title_tag.clone(),
            client_exe: cfg.client_exe.clone(),
        }
    }

    fn managed_title(&self, login: &str) -> String {
        format!("{} {}", self.title_tag, login)
    }

    /// Tiles the given accounts' windows left to right in the given order.
    /// Accounts without a window are skipped; returns whether anything was
    /// actually placed.
    pub fn arrange(
        &self,
        ordered: &[Arc<ManagedAccount>],
        resolver: &WindowResolver,
        stop: Option<&StopSignal>,
    ) -> bool {
        let mut placed = 0;
        for account in ordered {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return false;
            }
            let Some(handle) = resolver.resolve(account) else {
                continue;
            };
            if !self.windows.is_window(handle) {
                continue;
            }

            let x = placed * self.tile_width;
            let _ = self.windows.show_restore(handle);
            if self
                .windows
                .move_window(handle, x, 0, self.tile_width, self.tile_height)
                .is_err()
            {
                continue;
            }
            let _ = self
                .windows
                .set_window_title(handle, &self.managed_title(account.login()));
            placed += 1;
        }
        placed > 0
    }

    /// Brings one window per client process to the foreground, left in the
    /// z-order they get focused. Returns how many windows were lifted.
    pub async fn lift_all(&self) -> usize {
        let pids: HashSet<u32> = self
            .process
            .processes_matching(&self.client_exe)
            .into_iter()
            .collect();
        if pids.is_empty() {
            return 0;
        }

        let Ok(infos) = self.windows.enumerate_windows() else {
            return 0;
        };

        let mut processed = HashSet::new();
        let mut lifted = 0;
        for info in infos {
            if !pids.contains(&info.pid) || processed.contains(&info.pid) {
                continue;
            }
            if info.title.is_empty() {
                continue;
            }
            processed.insert(info.pid);
            focus_window(self.windows.as_ref(), info.handle);
            lifted += 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        lifted
    }

    /// Snaps the outer frame down to the client-area size when the two
    /// disagree, keeping the window position. The engine renders to the
    /// client area, so a stray border shifts every scripted coordinate.
    pub fn fix_frame(&self, handle: WindowHandle) {
        let (Ok(rect), Ok(client)) = (
            self.windows.window_rect(handle),
            self.windows.client_rect(handle),
        ) else {
            return;
        };

        if client.width() != rect.width() || client.height() != rect.height() {
            debug!(
                "snapping window {} frame {}x{} to client {}x{}",
                handle,
                rect.width(),
                rect.height(),
                client.width(),
                client.height()
            );
            let _ = self.windows.move_window(
                handle,
                rect.left,
                rect.top,
                client.width(),
                client.height(),
            );
        }
    }

    pub fn retitle(&self, handle: WindowHandle, login: &str) {
        let _ = self
            .windows
            .set_window_title(handle, &self.managed_title(login));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchrig_common::models::{AccountRecord, WindowInfo, WindowRect};
    use crate::os::{LaunchHandles, MockProcessApi, MockWindowSystem};

    fn valid_account(login: &str, launcher: u32, client: u32) -> Arc<ManagedAccount> {
        let account = ManagedAccount::new(AccountRecord::new(login, "pw", 0));
        account.set_handles(LaunchHandles {
            launcher_pid: launcher,
            client_pid: Some(client),
        });
        Arc::new(account)
    }

    fn client_process_api() -> MockProcessApi {
        let mut process = MockProcessApi::new();
        process.expect_pid_exists().returning(|_| true);
        process
            .expect_process_name()
            .returning(|_| Some("cs2.exe".to_string()));
        process.expect_parent_pid().returning(|pid| Some(pid - 1));
        process
    }

    fn window_system_for(pids: Vec<(isize, u32, &str)>) -> MockWindowSystem {
        let infos: Vec<WindowInfo> = pids
            .into_iter()
            .map(|(handle, pid, title)| WindowInfo {
                handle: WindowHandle(handle),
                pid,
                title: title.to_string(),
                rect: WindowRect::new(0, 0, 383, 280),
            })
            .collect();
        let mut windows = MockWindowSystem::new();
        windows
            .expect_enumerate_windows()
            .returning(move || Ok(infos.clone()));
        windows
    }

    #[test]
    fn arrange_tiles_in_order_and_retitles() {
        let mut windows =
            window_system_for(vec![(1, 11, "cs2 a"), (2, 21, "cs2 b")]);
        windows.expect_is_window().returning(|_| true);
        windows.expect_window_pid().returning(|h| match h.0 {
            1 => Some(11),
            2 => Some(21),
            _ => None,
        });
        windows.expect_show_restore().returning(|_| Ok(()));
        windows
            .expect_move_window()
            .withf(|h, x, y, w, hgt| *h == WindowHandle(1) && *x == 0 && *y == 0 && *w == 383 && *hgt == 280)
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        windows
            .expect_move_window()
            .withf(|h, x, _, _, _| *h == WindowHandle(2) && *x == 383)
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        windows
            .expect_set_window_title()
            .withf(|_, title| title.starts_with("[MATCHRIG] "))
            .times(2)
            .returning(|_, _| Ok(()));

        let windows = Arc::new(windows);
        let process = Arc::new(client_process_api());
        let cfg = AppConfig::default();
        let resolver = WindowResolver::new(windows.clone(), process.clone(), &cfg);
        let arranger = WindowArranger::new(windows, process, &cfg);

        let accounts = vec![valid_account("alpha", 10, 11), valid_account("bravo", 20, 21)];
        assert!(arranger.arrange(&accounts, &resolver, None));
    }

    #[test]
    fn arrange_stops_on_cancel_signal() {
        let windows = Arc::new(MockWindowSystem::new());
        let process = Arc::new(MockProcessApi::new());
        let cfg = AppConfig::default();
        let resolver = WindowResolver::new(windows.clone(), process.clone(), &cfg);
        let arranger = WindowArranger::new(windows, process, &cfg);

        let stop = StopSignal::new();
        stop.trigger();
        let accounts = vec![valid_account("alpha", 10, 11)];
        assert!(!arranger.arrange(&accounts, &resolver, Some(&stop)));
    }

    #[tokio::test]
    async fn lift_all_takes_one_window_per_process() {
        let mut windows = window_system_for(vec![
            (1, 11, "cs2 first"),
            (2, 11, "cs2 duplicate pid"),
            (3, 21, ""),
            (4, 31, "cs2 third"),
        ]);
        windows.expect_is_window().returning(|_| true);
        windows.expect_show_restore().returning(|_| Ok(()));
        windows.expect_foreground_window().returning(|| None);
        windows.expect_window_thread_id().returning(|_| Some(1));
        windows.expect_bring_to_top().returning(|_| Ok(()));
        windows.expect_set_foreground().returning(|_| Ok(()));

        let mut process = MockProcessApi::new();
        process
            .expect_processes_matching()
            .returning(|_| vec![11, 21, 31]);

        let cfg = AppConfig::default();
        let arranger = WindowArranger::new(Arc::new(windows), Arc::new(process), &cfg);

        // pid 11 counted once, pid 21's window has no title, pid 31 counted.
        assert_eq!(arranger.lift_all().await, 2);
    }

    #[test]
    fn fix_frame_snaps_outer_to_client_size() {
        let mut windows = MockWindowSystem::new();
        windows
            .expect_window_rect()
            .returning(|_| Ok(WindowRect::new(100, 50, 499, 360)));
        windows
            .expect_client_rect()
            .returning(|_| Ok(WindowRect::new(0, 0, 383, 280)));
        windows
            .expect_move_window()
            .withf(|_, x, y, w, h| *x == 100 && *y == 50 && *w == 383 && *h == 280)
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let arranger = WindowArranger::new(
            Arc::new(windows),
            Arc::new(MockProcessApi::new()),
            &AppConfig::default(),
        );
        arranger.fix_frame(WindowHandle(9));
    }

    #[test]
    fn fix_frame_leaves_matching_frame_alone() {
        let mut windows = MockWindowSystem::new();
        windows
            .expect_window_rect()
            .returning(|_| Ok(WindowRect::new(0, 0, 383, 280)));
        windows
            .expect_client_rect()
            .returning(|_| Ok(WindowRect::new(0, 0, 383, 280)));
        windows.expect_move_window().times(0);

        let arranger = WindowArranger::new(
            Arc::new(windows),
            Arc::new(MockProcessApi::new()),
            &AppConfig::default(),
        );
        arranger.fix_frame(WindowHandle(9));
    }
}
