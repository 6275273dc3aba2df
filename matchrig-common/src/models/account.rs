// File: matchrig-common/src/models/account.rs

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One managed client account, as loaded from its secret record at startup.
/// Everything except `login` and `steam_id` is opaque to the core; the
/// launcher adapter is the only consumer of the secret fields.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountRecord {
    pub account_id: Uuid,
    pub login: String,
    pub password: String,
    pub shared_secret: Option<String>,
    pub identity_secret: Option<String>,
    pub steam_id: u64,
}

impl AccountRecord {
    pub fn new(login: impl Into<String>, password: impl Into<String>, steam_id: u64) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            login: login.into(),
            password: password.into(),
            shared_secret: None,
            identity_secret: None,
            steam_id,
        }
    }
}

/// Semantic status of a managed account, surfaced to the operator as a color.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StatusColor {
    Idle,
    Queued,
    Launching,
    Running,
    Error,
}

impl fmt::Display for StatusColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusColor::Idle => write!(f, "idle"),
            StatusColor::Queued => write!(f, "queued"),
            StatusColor::Launching => write!(f, "launching"),
            StatusColor::Running => write!(f, "running"),
            StatusColor::Error => write!(f, "error"),
        }
    }
}

impl FromStr for StatusColor {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(StatusColor::Idle),
            "queued" => Ok(StatusColor::Queued),
            "launching" => Ok(StatusColor::Launching),
            "running" => Ok(StatusColor::Running),
            "error" => Ok(StatusColor::Error),
            _ => Err(format!("Unknown status color: {}", s)),
        }
    }
}

/// One entry of the persisted runtime mapping (login -> process ids), written
/// by the launcher outside this process and read here to re-adopt clients
/// after a restart. Pids arrive as numbers or numeric strings depending on
/// the writer's version, so both are accepted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RuntimeEntry {
    pub login: String,
    #[serde(rename = "SteamPid", default, deserialize_with = "pid_from_value")]
    pub steam_pid: Option<u32>,
    #[serde(rename = "CS2Pid", default, deserialize_with = "pid_from_value")]
    pub client_pid: Option<u32>,
}

fn pid_from_value<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        _ => None,
    })
}

/// Post-match statistics snapshot for one account.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlayerStats {
    pub login: String,
    pub level: u32,
    pub xp: u64,
    pub refreshed_at: DateTime<Utc>,
}
