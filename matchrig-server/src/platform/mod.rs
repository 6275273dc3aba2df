// matchrig-server/src/platform/mod.rs
//
// Native adapter selection. The core only ever sees the seam traits; this
// module decides which concrete set backs them. On Windows that is the real
// Win32 surface, everywhere else a stub set that keeps the binary building
// (and the portable file-backed stats provider, which works on any host).

#[cfg(not(windows))]
mod unsupported;
#[cfg(windows)]
mod win32;

mod stats;

pub use stats::FileStats;

use std::sync::Arc;

use matchrig_core::config::AppConfig;
use matchrig_core::os::{GameLauncher, InputInjector, PixelSampler, ProcessApi, StatsProvider, WindowSystem};

/// The full adapter set the service graph is wired against.
pub struct NativeAdapters {
    pub windows: Arc<dyn WindowSystem>,
    pub process: Arc<dyn ProcessApi>,
    pub input: Arc<dyn InputInjector>,
    pub pixels: Arc<dyn PixelSampler>,
    pub launcher: Arc<dyn GameLauncher>,
    pub stats: Arc<dyn StatsProvider>,
}

#[cfg(windows)]
pub fn native_adapters(cfg: &AppConfig) -> NativeAdapters {
    let process: Arc<dyn ProcessApi> = Arc::new(win32::Win32Processes);
    NativeAdapters {
        windows: Arc::new(win32::Win32Windows),
        input: Arc::new(win32::Win32Input),
        pixels: Arc::new(win32::Win32Pixels),
        launcher: Arc::new(win32::SteamLauncher::new(process.clone(), cfg)),
        stats: Arc::new(FileStats::new(&cfg.stats_path)),
        process,
    }
}

#[cfg(not(windows))]
pub fn native_adapters(cfg: &AppConfig) -> NativeAdapters {
    NativeAdapters {
        windows: Arc::new(unsupported::UnsupportedWindows),
        process: Arc::new(unsupported::UnsupportedProcesses),
        input: Arc::new(unsupported::UnsupportedInput),
        pixels: Arc::new(unsupported::UnsupportedPixels),
        launcher: Arc::new(unsupported::UnsupportedLauncher),
        stats: Arc::new(FileStats::new(&cfg.stats_path)),
    }
}
