// matchrig-server/src/platform/unsupported.rs
//
// Inert adapters for non-Windows hosts. The binary still starts (telemetry
// and control endpoints stay reachable), but anything that needs the desktop
// reports Unsupported instead.

use async_trait::async_trait;

use matchrig_common::models::{AccountRecord, Rgb, WindowHandle, WindowInfo, WindowRect};
use matchrig_common::Error;
use matchrig_core::os::{
    GameLauncher, InputInjector, Key, LaunchHandles, PixelSampler, ProcessApi, WindowSystem,
};

fn unsupported(what: &str) -> Error {
    Error::Unsupported(format!("{what} requires a Windows desktop"))
}

pub struct UnsupportedWindows;

impl WindowSystem for UnsupportedWindows {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, Error> {
        Err(unsupported("window enumeration"))
    }

    fn is_window(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn window_rect(&self, _handle: WindowHandle) -> Result<WindowRect, Error> {
        Err(unsupported("window geometry"))
    }

    fn client_rect(&self, _handle: WindowHandle) -> Result<WindowRect, Error> {
        Err(unsupported("window geometry"))
    }

    fn window_title(&self, _handle: WindowHandle) -> String {
        String::new()
    }

    fn window_pid(&self, _handle: WindowHandle) -> Option<u32> {
        None
    }

    fn window_thread_id(&self, _handle: WindowHandle) -> Option<u32> {
        None
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        None
    }

    fn show_restore(&self, _handle: WindowHandle) -> Result<(), Error> {
        Err(unsupported("window activation"))
    }

    fn bring_to_top(&self, _handle: WindowHandle) -> Result<(), Error> {
        Err(unsupported("window activation"))
    }

    fn set_foreground(&self, _handle: WindowHandle) -> Result<(), Error> {
        Err(unsupported("window activation"))
    }

    fn attach_thread_input(
        &self,
        _from_thread: u32,
        _to_thread: u32,
        _attach: bool,
    ) -> Result<(), Error> {
        Err(unsupported("thread input attachment"))
    }

    fn move_window(
        &self,
        _handle: WindowHandle,
        _x: i32,
        _y: i32,
        _width: i32,
        _height: i32,
    ) -> Result<(), Error> {
        Err(unsupported("window placement"))
    }

    fn set_window_title(&self, _handle: WindowHandle, _title: &str) -> Result<(), Error> {
        Err(unsupported("window titling"))
    }
}

pub struct UnsupportedProcesses;

impl ProcessApi for UnsupportedProcesses {
    fn pid_exists(&self, _pid: u32) -> bool {
        false
    }

    fn process_name(&self, _pid: u32) -> Option<String> {
        None
    }

    fn parent_pid(&self, _pid: u32) -> Option<u32> {
        None
    }

    fn processes_matching(&self, _fragment: &str) -> Vec<u32> {
        Vec::new()
    }

    fn kill(&self, _pid: u32) -> Result<(), Error> {
        Err(unsupported("process termination"))
    }
}

pub struct UnsupportedInput;

impl InputInjector for UnsupportedInput {
    fn key_down(&self, _key: Key) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }

    fn key_up(&self, _key: Key) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }

    fn tap(&self, _key: Key) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }

    fn move_cursor(&self, _x: i32, _y: i32) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }

    fn mouse_down(&self) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }

    fn mouse_up(&self) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }

    fn post_key_down(&self, _window: WindowHandle, _key: Key) -> Result<(), Error> {
        Err(unsupported("message posting"))
    }

    fn post_key_up(&self, _window: WindowHandle, _key: Key) -> Result<(), Error> {
        Err(unsupported("message posting"))
    }

    fn paste(&self) -> Result<(), Error> {
        Err(unsupported("input injection"))
    }
}

pub struct UnsupportedPixels;

impl PixelSampler for UnsupportedPixels {
    fn sample_block(&self, _x: i32, _y: i32) -> Result<Rgb, Error> {
        Err(unsupported("screen sampling"))
    }
}

pub struct UnsupportedLauncher;

#[async_trait]
impl GameLauncher for UnsupportedLauncher {
    async fn start(&self, record: &AccountRecord) -> Result<LaunchHandles, Error> {
        Err(Error::Unsupported(format!(
            "[{}] launching requires a Windows desktop",
            record.login
        )))
    }

    async fn kill(&self, login: &str, _handles: &LaunchHandles) -> Result<(), Error> {
        Err(Error::Unsupported(format!(
            "[{login}] launcher teardown requires a Windows desktop"
        )))
    }
}
