// File: matchrig-core/src/config.rs

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use crate::Error;

/// Process-wide configuration, loaded once at startup and shared by `Arc`.
/// Every field has a default so a missing or partial file still yields a
/// working local setup; the file only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bind address for the telemetry ingest endpoint.
    pub telemetry_bind: String,
    /// Bind address for the operator control API.
    pub control_bind: String,

    /// Image name of the managed game client.
    pub client_exe: String,
    /// Marker prefix written into managed window titles, followed by login.
    pub window_title_tag: String,
    /// Game install directory; log files are searched under it.
    pub game_dir: PathBuf,
    /// Directory of per-account secret records (`<steamid>.mafile`).
    pub secrets_dir: PathBuf,
    /// `login:password` lines, one account per line.
    pub credentials_path: PathBuf,
    /// Persisted login -> pid mapping written by the launcher.
    pub runtime_map_path: PathBuf,
    /// Per-login level/xp cache maintained by external tooling.
    pub stats_path: PathBuf,
    /// Launcher executable plus extra arguments passed through to it.
    pub launcher_exe: PathBuf,
    pub launcher_args: String,
    pub client_args: String,

    /// Tile size used when arranging client windows into a row.
    pub tile_width: i32,
    pub tile_height: i32,

    /// Seconds to wait after a launch before marking the account running.
    pub post_launch_delay_secs: u64,
    /// Extra spacing between accounts when launching a batch.
    pub inter_account_delay_secs: u64,

    /// Hard deadline for one wait-for-accept cycle.
    pub search_timeout_secs: u64,
    /// How many search/recovery cycles to attempt before giving up.
    pub recovery_cycles: u32,
    /// Concurrent identical match ids required to declare a match found.
    pub consensus_threshold: usize,
    /// Deadline for forcing leader controls green during recovery.
    pub green_wait_secs: u64,
    /// Pause before the post-match restart flow touches any window.
    pub post_match_wait_secs: u64,

    /// Client count that arms the auto-arrange task.
    pub auto_arrange_min_clients: usize,
    /// Delay between reaching the client count and arranging.
    pub auto_arrange_delay_secs: u64,
    /// Whether auto-arrange also starts a search run afterwards.
    pub auto_search: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telemetry_bind: "127.0.0.1:6969".to_string(),
            control_bind: "127.0.0.1:7070".to_string(),
            client_exe: "cs2.exe".to_string(),
            window_title_tag: "[MATCHRIG]".to_string(),
            game_dir: PathBuf::from(
                "C:/Program Files (x86)/Steam/steamapps/common/Counter-Strike Global Offensive",
            ),
            secrets_dir: PathBuf::from("mafiles"),
            credentials_path: PathBuf::from("logpass.txt"),
            runtime_map_path: PathBuf::from("runtime.json"),
            stats_path: PathBuf::from("level.json"),
            launcher_exe: PathBuf::from("C:/Program Files (x86)/Steam/steam.exe"),
            launcher_args: "-nofriendsui -vgui -noreactlogin".to_string(),
            client_args: String::new(),
            tile_width: 383,
            tile_height: 280,
            post_launch_delay_secs: 5,
            inter_account_delay_secs: 10,
            search_timeout_secs: 600,
            recovery_cycles: 3,
            consensus_threshold: 4,
            green_wait_secs: 20,
            post_match_wait_secs: 90,
            auto_arrange_min_clients: 4,
            auto_arrange_delay_secs: 40,
            auto_search: false,
        }
    }
}

impl AppConfig {
    /// Loads the config file, falling back to defaults when it is absent.
    /// A present-but-invalid file is an error; silently ignoring it would
    /// hide typos in operator setups.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            warn!("config file {:?} not found; using defaults", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let cfg: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{:?}: {}", path, e)))?;
        info!("loaded config from {:?}", path);
        Ok(cfg)
    }

    /// Roots scanned for per-account log files, newest match wins.
    pub fn log_roots(&self) -> Vec<PathBuf> {
        vec![
            self.game_dir.clone(),
            self.game_dir.join("game").join("csgo"),
            PathBuf::from("."),
        ]
    }

    /// Title written onto a managed client window.
    pub fn managed_title(&self, login: &str) -> String {
        format!("{} {}", self.window_title_tag, login)
    }
}
