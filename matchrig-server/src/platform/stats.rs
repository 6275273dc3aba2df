// matchrig-server/src/platform/stats.rs
//
// Level/xp lookup backed by the JSON cache an external profile scraper
// maintains (`{"<login>": {"level": N, "xp": M}, ...}`). Re-read on every
// refresh so updates written between matches are picked up without a restart.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use matchrig_common::models::PlayerStats;
use matchrig_common::Error;
use matchrig_core::os::StatsProvider;

#[derive(Debug, Deserialize)]
struct StatsEntry {
    #[serde(default)]
    level: u32,
    #[serde(default)]
    xp: u64,
}

pub struct FileStats {
    path: PathBuf,
}

impl FileStats {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<HashMap<String, StatsEntry>, Error> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl StatsProvider for FileStats {
    async fn refresh_stats(&self, login: &str) -> Result<PlayerStats, Error> {
        let all = self.read_all()?;
        let entry = all
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(login))
            .map(|(_, entry)| entry)
            .ok_or_else(|| Error::NotFound(format!("stats for {login}")))?;
        info!("[{}] stats refreshed: level {} xp {}", login, entry.level, entry.xp);
        Ok(PlayerStats {
            login: login.to_string(),
            level: entry.level,
            xp: entry.xp,
            refreshed_at: Utc::now(),
        })
    }
}
