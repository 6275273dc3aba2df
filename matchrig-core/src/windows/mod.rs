// File: matchrig-core/src/windows/mod.rs
//
// Window discovery and layout for the managed client fleet. The resolver
// maps accounts to their live client windows; the arranger tiles, lifts and
// repairs those windows. Both stay synchronous; pacing belongs to callers.

pub mod arranger;
pub mod resolver;

pub use arranger::WindowArranger;
pub use resolver::{order, WindowResolver};

use matchrig_common::models::WindowHandle;
use crate::os::WindowSystem;

/// Brings a window to the foreground, attaching input queues to the current
/// foreground thread when they differ so the focus change is not rejected.
/// The window can vanish between calls, so it is re-checked at every step.
pub fn focus_window(windows: &dyn WindowSystem, handle: WindowHandle) -> bool {
    if handle.is_null() || !windows.is_window(handle) {
        return false;
    }

    let _ = windows.show_restore(handle);

    let fg_thread = windows
        .foreground_window()
        .and_then(|fg| windows.window_thread_id(fg))
        .unwrap_or(0);
    let target_thread = windows.window_thread_id(handle).unwrap_or(0);
    let attach = fg_thread != 0 && target_thread != 0 && fg_thread != target_thread;

    if attach {
        let _ = windows.attach_thread_input(fg_thread, target_thread, true);
    }

    let focused = (|| {
        if !windows.is_window(handle) {
            return false;
        }
        let _ = windows.bring_to_top(handle);
        if !windows.is_window(handle) {
            return false;
        }
        windows.set_foreground(handle).is_ok()
    })();

    if attach {
        let _ = windows.attach_thread_input(fg_thread, target_thread, false);
    }

    focused
}
