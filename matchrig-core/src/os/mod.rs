// File: matchrig-core/src/os/mod.rs
//
// Seams between the portable orchestration logic and the host OS. Every
// service works against these traits; the server binary wires the native
// implementations, and tests substitute deterministic fakes or mocks.

use async_trait::async_trait;
use matchrig_common::models::{AccountRecord, PlayerStats, Rgb, WindowHandle, WindowInfo, WindowRect};
use crate::Error;

/// A key the injector can press. The scripted routes only ever need single
/// characters plus the two specials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Ctrl,
    Escape,
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c),
            Key::Ctrl => write!(f, "ctrl"),
            Key::Escape => write!(f, "esc"),
        }
    }
}

/// Desktop window queries and manipulation.
///
/// `enumerate_windows` yields only visible, enabled, parentless top-level
/// windows; all filtering beyond that (pid matching, title scoring, area
/// ranking) happens in the resolver where it can be unit-tested.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSystem: Send + Sync {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, Error>;
    fn is_window(&self, handle: WindowHandle) -> bool;
    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect, Error>;
    /// Client area in screen coordinates (the adapter translates the
    /// window-local client rect before returning it).
    fn client_rect(&self, handle: WindowHandle) -> Result<WindowRect, Error>;
    fn window_title(&self, handle: WindowHandle) -> String;
    fn window_pid(&self, handle: WindowHandle) -> Option<u32>;
    fn window_thread_id(&self, handle: WindowHandle) -> Option<u32>;
    fn foreground_window(&self) -> Option<WindowHandle>;
    fn show_restore(&self, handle: WindowHandle) -> Result<(), Error>;
    fn bring_to_top(&self, handle: WindowHandle) -> Result<(), Error>;
    fn set_foreground(&self, handle: WindowHandle) -> Result<(), Error>;
    fn attach_thread_input(&self, from_thread: u32, to_thread: u32, attach: bool)
        -> Result<(), Error>;
    fn move_window(&self, handle: WindowHandle, x: i32, y: i32, width: i32, height: i32)
        -> Result<(), Error>;
    fn set_window_title(&self, handle: WindowHandle, title: &str) -> Result<(), Error>;
}

/// Process table queries plus the one mutation we ever do (kill).
#[cfg_attr(test, mockall::automock)]
pub trait ProcessApi: Send + Sync {
    fn pid_exists(&self, pid: u32) -> bool;
    /// Image name, lowercased, without path (e.g. "cs2.exe").
    fn process_name(&self, pid: u32) -> Option<String>;
    fn parent_pid(&self, pid: u32) -> Option<u32>;
    /// Pids of live processes whose image name contains `fragment`
    /// (case-insensitive).
    fn processes_matching(&self, fragment: &str) -> Vec<u32>;
    fn kill(&self, pid: u32) -> Result<(), Error>;
}

/// Raw synthetic input. Timing, combos and cancellation live in the
/// sequencer; these calls are expected to return immediately.
#[cfg_attr(test, mockall::automock)]
pub trait InputInjector: Send + Sync {
    fn key_down(&self, key: Key) -> Result<(), Error>;
    fn key_up(&self, key: Key) -> Result<(), Error>;
    fn tap(&self, key: Key) -> Result<(), Error>;
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), Error>;
    /// Left button transitions at the current cursor position; split so
    /// flows can insert their own press/release pacing.
    fn mouse_down(&self) -> Result<(), Error>;
    fn mouse_up(&self) -> Result<(), Error>;
    /// Posts a key transition straight to the window's message queue
    /// without changing focus. Down and up are separate so callers can
    /// pace the press themselves.
    fn post_key_down(&self, window: WindowHandle, key: Key) -> Result<(), Error>;
    fn post_key_up(&self, window: WindowHandle, key: Key) -> Result<(), Error>;
    /// Paste-from-clipboard chord, used by the party invite flow.
    fn paste(&self) -> Result<(), Error>;
}

/// Screen capture at absolute coordinates. The oracle translates
/// window-relative offsets before calling in.
#[cfg_attr(test, mockall::automock)]
pub trait PixelSampler: Send + Sync {
    /// Average color of the 2x2 block whose top-left corner is (x, y).
    fn sample_block(&self, x: i32, y: i32) -> Result<Rgb, Error>;
}

/// Pids handed back by the launcher black box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchHandles {
    pub launcher_pid: u32,
    pub client_pid: Option<u32>,
}

/// Account start/stop, external to this core. `start` blocks until the
/// launcher chain is up and returns the process handles it produced.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameLauncher: Send + Sync {
    async fn start(&self, record: &AccountRecord) -> Result<LaunchHandles, Error>;
    /// Tears down the launcher process; the client follows on its own.
    async fn kill(&self, login: &str, handles: &LaunchHandles) -> Result<(), Error>;
}

/// Post-match statistics lookup through the account provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn refresh_stats(&self, login: &str) -> Result<PlayerStats, Error>;
}
