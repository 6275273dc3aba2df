// File: matchrig-core/src/test_utils/helpers.rs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use matchrig_common::models::{
    AccountRecord, PlayerStats, Rgb, WindowHandle, WindowInfo, WindowRect,
};
use matchrig_common::Error;

use crate::config::AppConfig;
use crate::eventbus::EventBus;
use crate::input::Sequencer;
use crate::lobby::LobbyService;
use crate::oracle::AcceptOracle;
use crate::os::{
    GameLauncher, InputInjector, Key, LaunchHandles, PixelSampler, ProcessApi, StatsProvider,
    WindowSystem,
};
use crate::registry::{AccountRegistry, ManagedAccount};
use crate::search::{ConsensusDetector, SearchOrchestrator};
use crate::windows::{WindowArranger, WindowResolver};

/// One injected input action, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(Key),
    KeyUp(Key),
    Tap(Key),
    CursorMove(i32, i32),
    MouseDown,
    MouseUp,
    PostKeyDown(WindowHandle, Key),
    PostKeyUp(WindowHandle, Key),
    Paste,
}

/// Input injector that records everything and always succeeds.
#[derive(Default)]
pub struct ScriptedInput {
    events: Mutex<Vec<InputEvent>>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Count of full left clicks (down followed by up anywhere later).
    pub fn click_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, InputEvent::MouseDown))
            .count()
    }

    pub fn taps_of(&self, key: Key) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, InputEvent::Tap(k) if *k == key))
            .count()
    }

    fn push(&self, event: InputEvent) -> Result<(), Error> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl InputInjector for ScriptedInput {
    fn key_down(&self, key: Key) -> Result<(), Error> {
        self.push(InputEvent::KeyDown(key))
    }

    fn key_up(&self, key: Key) -> Result<(), Error> {
        self.push(InputEvent::KeyUp(key))
    }

    fn tap(&self, key: Key) -> Result<(), Error> {
        self.push(InputEvent::Tap(key))
    }

    fn move_cursor(&self, x: i32, y: i32) -> Result<(), Error> {
        self.push(InputEvent::CursorMove(x, y))
    }

    fn mouse_down(&self) -> Result<(), Error> {
        self.push(InputEvent::MouseDown)
    }

    fn mouse_up(&self) -> Result<(), Error> {
        self.push(InputEvent::MouseUp)
    }

    fn post_key_down(&self, window: WindowHandle, key: Key) -> Result<(), Error> {
        self.push(InputEvent::PostKeyDown(window, key))
    }

    fn post_key_up(&self, window: WindowHandle, key: Key) -> Result<(), Error> {
        self.push(InputEvent::PostKeyUp(window, key))
    }

    fn paste(&self) -> Result<(), Error> {
        self.push(InputEvent::Paste)
    }
}

#[derive(Default)]
struct DesktopState {
    windows: Vec<WindowInfo>,
    foreground: Option<WindowHandle>,
}

/// In-memory desktop. Window moves and retitles mutate the stored infos, so
/// resolver and arranger behavior can be asserted end to end.
#[derive(Default)]
pub struct FakeDesktop {
    state: Mutex<DesktopState>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_window(&self, handle: isize, pid: u32, title: &str, rect: WindowRect) {
        self.state.lock().windows.push(WindowInfo {
            handle: WindowHandle(handle),
            pid,
            title: title.to_string(),
            rect,
        });
    }

    pub fn remove_window(&self, handle: WindowHandle) {
        self.state.lock().windows.retain(|w| w.handle != handle);
    }

    pub fn title_of(&self, handle: WindowHandle) -> Option<String> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|w| w.handle == handle)
            .map(|w| w.title.clone())
    }

    pub fn rect_of(&self, handle: WindowHandle) -> Option<WindowRect> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|w| w.handle == handle)
            .map(|w| w.rect)
    }

    fn with_window<T>(&self, handle: WindowHandle, f: impl FnOnce(&WindowInfo) -> T) -> Option<T> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|w| w.handle == handle)
            .map(f)
    }
}

impl WindowSystem for FakeDesktop {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, Error> {
        Ok(self.state.lock().windows.clone())
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        self.with_window(handle, |_| ()).is_some()
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect, Error> {
        self.with_window(handle, |w| w.rect)
            .ok_or_else(|| Error::Window(format!("no window {:?}", handle)))
    }

    fn client_rect(&self, handle: WindowHandle) -> Result<WindowRect, Error> {
        // Borderless fake: client area equals the outer frame.
        self.window_rect(handle)
    }

    fn window_title(&self, handle: WindowHandle) -> String {
        self.with_window(handle, |w| w.title.clone()).unwrap_or_default()
    }

    fn window_pid(&self, handle: WindowHandle) -> Option<u32> {
        self.with_window(handle, |w| w.pid)
    }

    fn window_thread_id(&self, handle: WindowHandle) -> Option<u32> {
        self.with_window(handle, |w| w.pid.wrapping_mul(10) + 1)
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        self.state.lock().foreground
    }

    fn show_restore(&self, handle: WindowHandle) -> Result<(), Error> {
        self.window_rect(handle).map(|_| ())
    }

    fn bring_to_top(&self, handle: WindowHandle) -> Result<(), Error> {
        self.window_rect(handle).map(|_| ())
    }

    fn set_foreground(&self, handle: WindowHandle) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.windows.iter().any(|w| w.handle == handle) {
            state.foreground = Some(handle);
            Ok(())
        } else {
            Err(Error::Window(format!("no window {:?}", handle)))
        }
    }

    fn attach_thread_input(&self, _from: u32, _to: u32, _attach: bool) -> Result<(), Error> {
        Ok(())
    }

    fn move_window(
        &self,
        handle: WindowHandle,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        let Some(w) = state.windows.iter_mut().find(|w| w.handle == handle) else {
            return Err(Error::Window(format!("no window {:?}", handle)));
        };
        w.rect = WindowRect::new(x, y, x + width, y + height);
        Ok(())
    }

    fn set_window_title(&self, handle: WindowHandle, title: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        let Some(w) = state.windows.iter_mut().find(|w| w.handle == handle) else {
            return Err(Error::Window(format!("no window {:?}", handle)));
        };
        w.title = title.to_string();
        Ok(())
    }
}

#[derive(Clone)]
struct FakeProc {
    name: String,
    parent: Option<u32>,
}

/// In-memory process table.
#[derive(Default)]
pub struct FakeProcs {
    procs: Mutex<HashMap<u32, FakeProc>>,
    killed: Mutex<Vec<u32>>,
}

impl FakeProcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pid: u32, name: &str, parent: Option<u32>) {
        self.procs.lock().insert(
            pid,
            FakeProc {
                name: name.to_lowercase(),
                parent,
            },
        );
    }

    pub fn remove(&self, pid: u32) {
        self.procs.lock().remove(&pid);
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().clone()
    }
}

impl ProcessApi for FakeProcs {
    fn pid_exists(&self, pid: u32) -> bool {
        self.procs.lock().contains_key(&pid)
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.procs.lock().get(&pid).map(|p| p.name.clone())
    }

    fn parent_pid(&self, pid: u32) -> Option<u32> {
        self.procs.lock().get(&pid).and_then(|p| p.parent)
    }

    fn processes_matching(&self, fragment: &str) -> Vec<u32> {
        let fragment = fragment.to_lowercase();
        let mut pids: Vec<u32> = self
            .procs
            .lock()
            .iter()
            .filter(|(_, p)| p.name.contains(&fragment))
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    fn kill(&self, pid: u32) -> Result<(), Error> {
        if self.procs.lock().remove(&pid).is_none() {
            return Err(Error::NotFound(format!("pid {}", pid)));
        }
        self.killed.lock().push(pid);
        Ok(())
    }
}

/// Screen sampler backed by a sparse point map with a default color.
pub struct FakePixels {
    colors: Mutex<HashMap<(i32, i32), Rgb>>,
    default: Mutex<Rgb>,
}

impl FakePixels {
    pub fn new() -> Self {
        Self {
            colors: Mutex::new(HashMap::new()),
            // Ambiguous gray: classifies as Unknown until a test paints it.
            default: Mutex::new(Rgb {
                r: 128,
                g: 128,
                b: 128,
            }),
        }
    }

    pub fn set_default(&self, color: Rgb) {
        *self.default.lock() = color;
    }

    pub fn set(&self, x: i32, y: i32, color: Rgb) {
        self.colors.lock().insert((x, y), color);
    }

    pub fn clear(&self) {
        self.colors.lock().clear();
    }
}

impl Default for FakePixels {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelSampler for FakePixels {
    fn sample_block(&self, x: i32, y: i32) -> Result<Rgb, Error> {
        Ok(self
            .colors
            .lock()
            .get(&(x, y))
            .copied()
            .unwrap_or(*self.default.lock()))
    }
}

/// Launcher that fabricates pid pairs. When wired to a [`FakeProcs`] it
/// registers the launcher/client processes so validity checks pass.
pub struct FakeLauncher {
    next_pid: AtomicU32,
    procs: Option<Arc<FakeProcs>>,
    client_exe: String,
    started: Mutex<Vec<String>>,
    killed: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            procs: None,
            client_exe: "cs2.exe".to_string(),
            started: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_procs(procs: Arc<FakeProcs>, client_exe: &str) -> Self {
        Self {
            procs: Some(procs),
            client_exe: client_exe.to_lowercase(),
            ..Self::new()
        }
    }

    /// Every future `start` for this login fails.
    pub fn fail_for(&self, login: &str) {
        self.failing.lock().insert(login.to_lowercase());
    }

    /// Logins in start-call order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().clone()
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameLauncher for FakeLauncher {
    async fn start(&self, record: &AccountRecord) -> Result<LaunchHandles, Error> {
        self.started.lock().push(record.login.clone());
        if self.failing.lock().contains(&record.login.to_lowercase()) {
            return Err(Error::Launch(format!("scripted failure for {}", record.login)));
        }
        let launcher_pid = self.next_pid.fetch_add(2, Ordering::SeqCst);
        let client_pid = launcher_pid + 1;
        if let Some(procs) = &self.procs {
            procs.add(launcher_pid, "riglauncher.exe", None);
            procs.add(client_pid, &self.client_exe, Some(launcher_pid));
        }
        Ok(LaunchHandles {
            launcher_pid,
            client_pid: Some(client_pid),
        })
    }

    async fn kill(&self, login: &str, handles: &LaunchHandles) -> Result<(), Error> {
        self.killed.lock().push(login.to_string());
        if let Some(procs) = &self.procs {
            procs.remove(handles.launcher_pid);
            if let Some(client) = handles.client_pid {
                procs.remove(client);
            }
        }
        Ok(())
    }
}

/// Stats lookup backed by a per-login map.
#[derive(Default)]
pub struct FakeStats {
    stats: Mutex<HashMap<String, (u32, u64)>>,
}

impl FakeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, login: &str, level: u32, xp: u64) {
        self.stats.lock().insert(login.to_lowercase(), (level, xp));
    }
}

#[async_trait]
impl StatsProvider for FakeStats {
    async fn refresh_stats(&self, login: &str) -> Result<PlayerStats, Error> {
        let entry = self.stats.lock().get(&login.to_lowercase()).copied();
        let Some((level, xp)) = entry else {
            return Err(Error::NotFound(format!("stats for {}", login)));
        };
        Ok(PlayerStats {
            login: login.to_string(),
            level,
            xp,
            refreshed_at: Utc::now(),
        })
    }
}

/// Whole service graph over the fakes, for flow-level tests.
pub struct RigHarness {
    pub cfg: AppConfig,
    pub bus: Arc<EventBus>,
    pub desktop: Arc<FakeDesktop>,
    pub procs: Arc<FakeProcs>,
    pub pixels: Arc<FakePixels>,
    pub input: Arc<ScriptedInput>,
    pub registry: Arc<AccountRegistry>,
    pub resolver: Arc<WindowResolver>,
    pub arranger: Arc<WindowArranger>,
    pub sequencer: Arc<Sequencer>,
    pub oracle: Arc<AcceptOracle>,
    pub lobby: Arc<LobbyService>,
    pub consensus: Arc<ConsensusDetector>,
    pub search: Arc<SearchOrchestrator>,
}

impl RigHarness {
    /// Config with production click geometry but test-friendly timings.
    pub fn test_config() -> AppConfig {
        AppConfig {
            post_launch_delay_secs: 0,
            inter_account_delay_secs: 0,
            search_timeout_secs: 3,
            green_wait_secs: 1,
            post_match_wait_secs: 1,
            recovery_cycles: 2,
            auto_arrange_delay_secs: 0,
            ..AppConfig::default()
        }
    }

    pub fn new() -> Self {
        Self::with_config(Self::test_config())
    }

    pub fn with_config(cfg: AppConfig) -> Self {
        let desktop = Arc::new(FakeDesktop::new());
        let procs = Arc::new(FakeProcs::new());
        let pixels = Arc::new(FakePixels::new());
        let input = Arc::new(ScriptedInput::new());
        let windows: Arc<dyn WindowSystem> = desktop.clone();
        let process: Arc<dyn ProcessApi> = procs.clone();

        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(AccountRegistry::new(process.clone(), bus.clone(), &cfg));
        let resolver = Arc::new(WindowResolver::new(windows.clone(), process.clone(), &cfg));
        let arranger = Arc::new(WindowArranger::new(windows.clone(), process.clone(), &cfg));
        let sequencer = Arc::new(Sequencer::new(windows.clone(), input.clone()));
        let oracle = Arc::new(AcceptOracle::new(windows.clone(), pixels.clone()));
        let lobby = Arc::new(LobbyService::new(
            registry.clone(),
            resolver.clone(),
            arranger.clone(),
            sequencer.clone(),
            windows.clone(),
            process.clone(),
            &cfg,
        ));
        let consensus = Arc::new(ConsensusDetector::new(
            registry.clone(),
            lobby.clone(),
            arranger.clone(),
            resolver.clone(),
            sequencer.clone(),
            windows.clone(),
            bus.clone(),
            &cfg,
        ));
        let search = Arc::new(SearchOrchestrator::new(
            lobby.clone(),
            consensus.clone(),
            oracle.clone(),
            resolver.clone(),
            sequencer.clone(),
            bus.clone(),
            &cfg,
        ));

        Self {
            cfg,
            bus,
            desktop,
            procs,
            pixels,
            input,
            registry,
            resolver,
            arranger,
            sequencer,
            oracle,
            lobby,
            consensus,
            search,
        }
    }

    pub fn add_account(&self, login: &str) -> Arc<ManagedAccount> {
        self.registry
            .insert_all(vec![AccountRecord::new(login, "pw", 76561198000000001)]);
        self.registry.get(login).expect("account just inserted")
    }

    /// Account with a live launcher/client pid pair and a managed window at
    /// horizontal offset `x`. Pids and handle derive from `seq` so callers
    /// can reason about them.
    pub fn add_client(&self, login: &str, seq: u32, x: i32) -> Arc<ManagedAccount> {
        let account = self.add_account(login);
        let launcher_pid = 100 + seq * 10;
        let client_pid = launcher_pid + 1;
        self.procs.add(launcher_pid, "riglauncher.exe", None);
        self.procs
            .add(client_pid, &self.cfg.client_exe, Some(launcher_pid));
        account.set_handles(LaunchHandles {
            launcher_pid,
            client_pid: Some(client_pid),
        });
        self.desktop.add_window(
            seq as isize,
            client_pid,
            &self.cfg.managed_title(login),
            WindowRect::new(x, 0, x + self.cfg.tile_width, self.cfg.tile_height),
        );
        account
    }
}

impl Default for RigHarness {
    fn default() -> Self {
        Self::new()
    }
}
