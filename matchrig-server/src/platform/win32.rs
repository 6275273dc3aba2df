// matchrig-server/src/platform/win32.rs
//
// Real Win32 implementations of the OS seam traits. Thin by intent: handles
// are converted per call and never cached here, every policy decision (retry,
// scoring, pacing) lives in the core services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, COLORREF, HWND, LPARAM, POINT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{GetDC, GetPixel, ReleaseDC, CLR_INVALID};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    AttachThreadInput, SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE,
    KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_CONTROL, VK_ESCAPE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, ClientToScreen, EnumWindows, GetClientRect, GetForegroundWindow,
    GetWindowRect, GetWindowTextW, GetWindowThreadProcessId, IsWindow, IsWindowEnabled,
    IsWindowVisible, MoveWindow, PostMessageW, SetCursorPos, SetForegroundWindow, SetWindowTextW,
    ShowWindow, SW_RESTORE, WM_KEYDOWN, WM_KEYUP,
};

use matchrig_common::models::{AccountRecord, Rgb, WindowHandle, WindowInfo, WindowRect};
use matchrig_common::Error;
use matchrig_core::config::AppConfig;
use matchrig_core::os::{
    GameLauncher, InputInjector, Key, LaunchHandles, PixelSampler, ProcessApi, WindowSystem,
};

fn hwnd_of(handle: WindowHandle) -> HWND {
    HWND(handle.0 as *mut core::ffi::c_void)
}

fn handle_of(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn virtual_key(key: Key) -> Result<VIRTUAL_KEY, Error> {
    match key {
        Key::Ctrl => Ok(VK_CONTROL),
        Key::Escape => Ok(VK_ESCAPE),
        Key::Char(c) => {
            let scan = unsafe { VkKeyScanW(c as u16) };
            if scan == -1 {
                return Err(Error::Input(format!("no virtual key for {c:?}")));
            }
            Ok(VIRTUAL_KEY((scan & 0xff) as u16))
        }
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

pub struct Win32Windows;

unsafe extern "system" fn enum_proc(hwnd: HWND, lparam: LPARAM) -> windows::core::BOOL {
    let out = unsafe { &mut *(lparam.0 as *mut Vec<WindowInfo>) };
    unsafe {
        if !IsWindowVisible(hwnd).as_bool() || !IsWindowEnabled(hwnd).as_bool() {
            return true.into();
        }
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));

        let mut buf = [0u16; 512];
        let len = GetWindowTextW(hwnd, &mut buf).max(0) as usize;
        let title = String::from_utf16_lossy(&buf[..len]);

        let mut rect = RECT::default();
        if GetWindowRect(hwnd, &mut rect).is_err() {
            return true.into();
        }

        out.push(WindowInfo {
            handle: handle_of(hwnd),
            pid,
            title,
            rect: WindowRect::new(rect.left, rect.top, rect.right, rect.bottom),
        });
    }
    true.into()
}

impl WindowSystem for Win32Windows {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, Error> {
        let mut out: Vec<WindowInfo> = Vec::new();
        unsafe {
            EnumWindows(Some(enum_proc), LPARAM(&mut out as *mut _ as isize))
                .map_err(|e| Error::Window(format!("EnumWindows: {e}")))?;
        }
        Ok(out)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindow(Some(hwnd_of(handle))).as_bool() }
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect, Error> {
        let mut rect = RECT::default();
        unsafe {
            GetWindowRect(hwnd_of(handle), &mut rect)
                .map_err(|e| Error::Window(format!("GetWindowRect {handle}: {e}")))?;
        }
        Ok(WindowRect::new(rect.left, rect.top, rect.right, rect.bottom))
    }

    fn client_rect(&self, handle: WindowHandle) -> Result<WindowRect, Error> {
        let hwnd = hwnd_of(handle);
        let mut rect = RECT::default();
        let mut origin = POINT::default();
        unsafe {
            GetClientRect(hwnd, &mut rect)
                .map_err(|e| Error::Window(format!("GetClientRect {handle}: {e}")))?;
            ClientToScreen(hwnd, &mut origin)
                .ok()
                .map_err(|e| Error::Window(format!("ClientToScreen {handle}: {e}")))?;
        }
        Ok(WindowRect::new(
            origin.x,
            origin.y,
            origin.x + rect.right,
            origin.y + rect.bottom,
        ))
    }

    fn window_title(&self, handle: WindowHandle) -> String {
        let mut buf = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd_of(handle), &mut buf) }.max(0) as usize;
        String::from_utf16_lossy(&buf[..len])
    }

    fn window_pid(&self, handle: WindowHandle) -> Option<u32> {
        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd_of(handle), Some(&mut pid)) };
        (pid != 0).then_some(pid)
    }

    fn window_thread_id(&self, handle: WindowHandle) -> Option<u32> {
        let tid = unsafe { GetWindowThreadProcessId(hwnd_of(handle), None) };
        (tid != 0).then_some(tid)
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        let hwnd = unsafe { GetForegroundWindow() };
        (!hwnd.is_invalid()).then(|| handle_of(hwnd))
    }

    fn show_restore(&self, handle: WindowHandle) -> Result<(), Error> {
        unsafe { ShowWindow(hwnd_of(handle), SW_RESTORE) };
        Ok(())
    }

    fn bring_to_top(&self, handle: WindowHandle) -> Result<(), Error> {
        unsafe {
            BringWindowToTop(hwnd_of(handle))
                .map_err(|e| Error::Window(format!("BringWindowToTop {handle}: {e}")))
        }
    }

    fn set_foreground(&self, handle: WindowHandle) -> Result<(), Error> {
        let ok = unsafe { SetForegroundWindow(hwnd_of(handle)) };
        if ok.as_bool() {
            Ok(())
        } else {
            Err(Error::Window(format!("SetForegroundWindow {handle} refused")))
        }
    }

    fn attach_thread_input(
        &self,
        from_thread: u32,
        to_thread: u32,
        attach: bool,
    ) -> Result<(), Error> {
        let ok = unsafe { AttachThreadInput(from_thread, to_thread, attach.into()) };
        if ok.as_bool() {
            Ok(())
        } else {
            Err(Error::Window(format!(
                "AttachThreadInput {from_thread}->{to_thread} failed"
            )))
        }
    }

    fn move_window(
        &self,
        handle: WindowHandle,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<(), Error> {
        unsafe {
            MoveWindow(hwnd_of(handle), x, y, width, height, true)
                .map_err(|e| Error::Window(format!("MoveWindow {handle}: {e}")))
        }
    }

    fn set_window_title(&self, handle: WindowHandle, title: &str) -> Result<(), Error> {
        let text = wide(title);
        unsafe {
            SetWindowTextW(hwnd_of(handle), PCWSTR(text.as_ptr()))
                .map_err(|e| Error::Window(format!("SetWindowTextW {handle}: {e}")))
        }
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

pub struct Win32Processes;

impl Win32Processes {
    /// Walks one Toolhelp snapshot, calling `visit` per live process.
    fn for_each(&self, mut visit: impl FnMut(&PROCESSENTRY32W)) {
        unsafe {
            let snapshot = match CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) {
                Ok(h) => h,
                Err(e) => {
                    warn!("process snapshot failed: {e}");
                    return;
                }
            };
            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    visit(&entry);
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
            let _ = CloseHandle(snapshot);
        }
    }
}

fn exe_name(entry: &PROCESSENTRY32W) -> String {
    let len = entry
        .szExeFile
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(entry.szExeFile.len());
    String::from_utf16_lossy(&entry.szExeFile[..len]).to_lowercase()
}

impl ProcessApi for Win32Processes {
    fn pid_exists(&self, pid: u32) -> bool {
        let mut found = false;
        self.for_each(|entry| {
            if entry.th32ProcessID == pid {
                found = true;
            }
        });
        found
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        let mut name = None;
        self.for_each(|entry| {
            if entry.th32ProcessID == pid {
                name = Some(exe_name(entry));
            }
        });
        name
    }

    fn parent_pid(&self, pid: u32) -> Option<u32> {
        let mut parent = None;
        self.for_each(|entry| {
            if entry.th32ProcessID == pid {
                parent = Some(entry.th32ParentProcessID);
            }
        });
        parent
    }

    fn processes_matching(&self, fragment: &str) -> Vec<u32> {
        let needle = fragment.to_lowercase();
        let mut pids = Vec::new();
        self.for_each(|entry| {
            if exe_name(entry).contains(&needle) {
                pids.push(entry.th32ProcessID);
            }
        });
        pids
    }

    fn kill(&self, pid: u32) -> Result<(), Error> {
        unsafe {
            match OpenProcess(PROCESS_TERMINATE, false, pid) {
                Ok(handle) => {
                    let result = TerminateProcess(handle, 0);
                    let _ = CloseHandle(handle);
                    result.map_err(|e| Error::Launch(format!("terminate pid {pid}: {e}")))
                }
                Err(e) => Err(Error::Launch(format!("open pid {pid}: {e}"))),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

pub struct Win32Input;

fn key_input(vk: VIRTUAL_KEY, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                dwFlags: flags,
                ..Default::default()
            },
        },
    }
}

fn mouse_input(flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dwFlags: flags,
                ..Default::default()
            },
        },
    }
}

fn send(inputs: &[INPUT]) -> Result<(), Error> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize == inputs.len() {
        Ok(())
    } else {
        Err(Error::Input(format!(
            "SendInput injected {sent} of {} events",
            inputs.len()
        )))
    }
}

impl InputInjector for Win32Input {
    fn key_down(&self, key: Key) -> Result<(), Error> {
        send(&[key_input(virtual_key(key)?, KEYBD_EVENT_FLAGS(0))])
    }

    fn key_up(&self, key: Key) -> Result<(), Error> {
        send(&[key_input(virtual_key(key)?, KEYEVENTF_KEYUP)])
    }

    fn tap(&self, key: Key) -> Result<(), Error> {
        let vk = virtual_key(key)?;
        send(&[
            key_input(vk, KEYBD_EVENT_FLAGS(0)),
            key_input(vk, KEYEVENTF_KEYUP),
        ])
    }

    fn move_cursor(&self, x: i32, y: i32) -> Result<(), Error> {
        unsafe { SetCursorPos(x, y).map_err(|e| Error::Input(format!("SetCursorPos: {e}"))) }
    }

    fn mouse_down(&self) -> Result<(), Error> {
        send(&[mouse_input(MOUSEEVENTF_LEFTDOWN)])
    }

    fn mouse_up(&self) -> Result<(), Error> {
        send(&[mouse_input(MOUSEEVENTF_LEFTUP)])
    }

    fn post_key_down(&self, window: WindowHandle, key: Key) -> Result<(), Error> {
        let vk = virtual_key(key)?;
        unsafe {
            PostMessageW(
                Some(hwnd_of(window)),
                WM_KEYDOWN,
                WPARAM(vk.0 as usize),
                LPARAM(0),
            )
            .map_err(|e| Error::Input(format!("PostMessageW keydown {window}: {e}")))
        }
    }

    fn post_key_up(&self, window: WindowHandle, key: Key) -> Result<(), Error> {
        let vk = virtual_key(key)?;
        unsafe {
            PostMessageW(
                Some(hwnd_of(window)),
                WM_KEYUP,
                WPARAM(vk.0 as usize),
                LPARAM(0),
            )
            .map_err(|e| Error::Input(format!("PostMessageW keyup {window}: {e}")))
        }
    }

    fn paste(&self) -> Result<(), Error> {
        let v = virtual_key(Key::Char('v'))?;
        send(&[
            key_input(VK_CONTROL, KEYBD_EVENT_FLAGS(0)),
            key_input(v, KEYBD_EVENT_FLAGS(0)),
            key_input(v, KEYEVENTF_KEYUP),
            key_input(VK_CONTROL, KEYEVENTF_KEYUP),
        ])
    }
}

// ---------------------------------------------------------------------------
// Pixels
// ---------------------------------------------------------------------------

pub struct Win32Pixels;

impl PixelSampler for Win32Pixels {
    fn sample_block(&self, x: i32, y: i32) -> Result<Rgb, Error> {
        unsafe {
            let hdc = GetDC(None);
            if hdc.is_invalid() {
                return Err(Error::Capture("GetDC returned no screen context".into()));
            }
            let mut sums = [0u32; 3];
            let mut count = 0u32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let color: COLORREF = GetPixel(hdc, x + dx, y + dy);
                    if color == CLR_INVALID {
                        continue;
                    }
                    sums[0] += color.0 & 0xff;
                    sums[1] += (color.0 >> 8) & 0xff;
                    sums[2] += (color.0 >> 16) & 0xff;
                    count += 1;
                }
            }
            ReleaseDC(None, hdc);
            if count == 0 {
                return Err(Error::Capture(format!("no readable pixels at ({x}, {y})")));
            }
            Ok(Rgb {
                r: (sums[0] / count) as u8,
                g: (sums[1] / count) as u8,
                b: (sums[2] / count) as u8,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// How long to wait for the client process to appear under the launcher.
const CLIENT_DISCOVERY_WINDOW: Duration = Duration::from_secs(120);
const CLIENT_POLL: Duration = Duration::from_millis(500);

/// Starts the platform launcher per account and waits for the game client it
/// spawns. The client is recognized by image name plus parent linkage, the
/// same check the registry keeps applying for liveness afterwards.
pub struct SteamLauncher {
    process: Arc<dyn ProcessApi>,
    launcher_exe: std::path::PathBuf,
    launcher_args: Vec<String>,
    client_args: Vec<String>,
    client_exe: String,
}

impl SteamLauncher {
    pub fn new(process: Arc<dyn ProcessApi>, cfg: &AppConfig) -> Self {
        Self {
            process,
            launcher_exe: cfg.launcher_exe.clone(),
            launcher_args: cfg
                .launcher_args
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            client_args: cfg
                .client_args
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            client_exe: cfg.client_exe.to_lowercase(),
        }
    }
}

#[async_trait]
impl GameLauncher for SteamLauncher {
    async fn start(&self, record: &AccountRecord) -> Result<LaunchHandles, Error> {
        let mut cmd = Command::new(&self.launcher_exe);
        cmd.args(&self.launcher_args)
            .arg("-login")
            .arg(&record.login)
            .arg(&record.password)
            .arg("-applaunch")
            .arg("730")
            .arg("-con_logfile")
            .arg(format!("{}.log", record.login))
            .args(&self.client_args);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("[{}] spawn {:?}: {e}", record.login, self.launcher_exe)))?;
        let launcher_pid = child
            .id()
            .ok_or_else(|| Error::Launch(format!("[{}] launcher exited immediately", record.login)))?;
        info!("[{}] launcher started (pid {})", record.login, launcher_pid);

        // The launcher logs in and starts the client on its own; all we can
        // do is watch the process table for the child to show up.
        let deadline = Instant::now() + CLIENT_DISCOVERY_WINDOW;
        loop {
            for pid in self.process.processes_matching(&self.client_exe) {
                if self.process.parent_pid(pid) == Some(launcher_pid) {
                    info!("[{}] client up (pid {})", record.login, pid);
                    return Ok(LaunchHandles {
                        launcher_pid,
                        client_pid: Some(pid),
                    });
                }
            }
            if !self.process.pid_exists(launcher_pid) {
                return Err(Error::Launch(format!(
                    "[{}] launcher (pid {launcher_pid}) exited before the client started",
                    record.login
                )));
            }
            if Instant::now() >= deadline {
                return Err(Error::Launch(format!(
                    "[{}] client did not appear within {:?}",
                    record.login, CLIENT_DISCOVERY_WINDOW
                )));
            }
            sleep(CLIENT_POLL).await;
        }
    }

    async fn kill(&self, login: &str, handles: &LaunchHandles) -> Result<(), Error> {
        info!("[{}] terminating launcher (pid {})", login, handles.launcher_pid);
        self.process.kill(handles.launcher_pid)
    }
}
