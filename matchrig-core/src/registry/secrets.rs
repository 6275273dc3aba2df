// File: matchrig-core/src/registry/secrets.rs
//
// Secret records and the credentials file that seed the account registry.
// Different exporters disagree on key casing and on whether fields live at
// the top level or inside a `Session` block, so parsing goes through
// `serde_json::Value` with ordered fallbacks instead of a fixed struct.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use matchrig_common::models::AccountRecord;
use crate::Error;

/// One parsed per-account secret record (`<steamid>.mafile`).
#[derive(Debug, Clone)]
pub struct SecretRecord {
    /// Lowercased; join key against the credentials file.
    pub account_name: String,
    pub shared_secret: Option<String>,
    pub identity_secret: Option<String>,
    pub steam_id: u64,
}

fn string_field(data: &Value, session: &Value, keys: &[&str]) -> Option<String> {
    for scope in [data, session] {
        for key in keys {
            if let Some(s) = scope.get(key).and_then(Value::as_str) {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

fn id_field(session: &Value, data: &Value, keys: &[&str]) -> Option<u64> {
    for scope in [session, data] {
        for key in keys {
            match scope.get(key) {
                Some(Value::Number(n)) => {
                    if let Some(v) = n.as_u64() {
                        return Some(v);
                    }
                }
                Some(Value::String(s)) => {
                    if let Ok(v) = s.parse::<u64>() {
                        return Some(v);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

impl SecretRecord {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let data: Value = serde_json::from_str(raw)?;
        let session = data.get("Session").cloned().unwrap_or(Value::Null);

        let account_name = string_field(&data, &session, &["account_name", "AccountName"])
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Parse("secret record has no account_name".to_string()))?;

        Ok(Self {
            account_name,
            shared_secret: string_field(&data, &session, &["shared_secret", "SharedSecret"]),
            identity_secret: string_field(&data, &session, &["identity_secret", "IdentitySecret"]),
            steam_id: id_field(&session, &data, &["SteamID", "steamid"]).unwrap_or(0),
        })
    }
}

/// Directory of secret records, plus the steamid -> login cache used by the
/// telemetry feed (one file read per unseen steamid, cached forever after).
pub struct SecretStore {
    dir: PathBuf,
    steamid_login_cache: DashMap<String, String>,
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            steamid_login_cache: DashMap::new(),
        }
    }

    /// Parses every `.mafile` in the directory; unparseable files are
    /// skipped with a warning so one bad export never blocks startup.
    pub fn load_all(&self) -> Vec<SecretRecord> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return records,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_mafile = path
                .extension()
                .map(|e| e.to_string_lossy().eq_ignore_ascii_case("mafile"))
                .unwrap_or(false);
            if !is_mafile {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(r) => r,
                Err(e) => {
                    warn!("unreadable secret record {:?}: {}", path, e);
                    continue;
                }
            };
            match SecretRecord::parse(&raw) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!("skipping secret record {:?}: {}", path, e),
            }
        }
        records
    }

    /// Maps a telemetry-reported steamid to a login via `<steamid>.mafile`.
    pub fn login_for_steamid(&self, steamid: &str) -> Option<String> {
        if let Some(hit) = self.steamid_login_cache.get(steamid) {
            return Some(hit.clone());
        }
        let path = self.dir.join(format!("{steamid}.mafile"));
        let raw = fs::read_to_string(path).ok()?;
        let record = SecretRecord::parse(&raw).ok()?;
        self.steamid_login_cache
            .insert(steamid.to_string(), record.account_name.clone());
        Some(record.account_name)
    }
}

/// Reads `login:password` lines; creates the file with a placeholder line
/// when absent so a fresh checkout has something to edit.
pub fn load_credentials(path: &Path) -> Result<Vec<(String, String)>, Error> {
    if !path.exists() {
        let mut f = fs::File::create(path)?;
        writeln!(f, "example:password")?;
    }
    let raw = fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for line in raw.lines() {
        if let Some((login, password)) = line.trim().split_once(':') {
            if !login.is_empty() {
                pairs.push((login.to_string(), password.to_string()));
            }
        }
    }
    Ok(pairs)
}

/// Joins credentials with secret records by lowercased login. Accounts
/// without a record still load, just without secrets or a platform id.
pub fn build_accounts(
    credentials: Vec<(String, String)>,
    records: Vec<SecretRecord>,
) -> Vec<AccountRecord> {
    let by_login: std::collections::HashMap<String, SecretRecord> = records
        .into_iter()
        .map(|r| (r.account_name.clone(), r))
        .collect();

    credentials
        .into_iter()
        .map(|(login, password)| match by_login.get(&login.to_lowercase()) {
            Some(rec) => {
                if rec.shared_secret.is_none() {
                    warn!("[{}] secret record found but shared_secret is empty", login);
                }
                let mut acc = AccountRecord::new(&login, &password, rec.steam_id);
                acc.shared_secret = rec.shared_secret.clone();
                acc.identity_secret = rec.identity_secret.clone();
                acc
            }
            None => {
                warn!("[{}] no secret record matched by account_name", login);
                AccountRecord::new(&login, &password, 0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_top_level_record() {
        let rec = SecretRecord::parse(
            r#"{"account_name":"Alpha","shared_secret":"abc","steamid":76561198000000001}"#,
        )
        .unwrap();
        assert_eq!(rec.account_name, "alpha");
        assert_eq!(rec.shared_secret.as_deref(), Some("abc"));
        assert_eq!(rec.steam_id, 76561198000000001);
    }

    #[test]
    fn falls_back_to_session_block_and_string_ids() {
        let rec = SecretRecord::parse(
            r#"{"Session":{"AccountName":"bravo","SharedSecret":"xyz","SteamID":"76561198000000002"}}"#,
        )
        .unwrap();
        assert_eq!(rec.account_name, "bravo");
        assert_eq!(rec.shared_secret.as_deref(), Some("xyz"));
        assert_eq!(rec.steam_id, 76561198000000002);
    }

    #[test]
    fn missing_account_name_is_an_error() {
        assert!(SecretRecord::parse(r#"{"shared_secret":"abc"}"#).is_err());
    }

    #[test]
    fn credentials_file_is_created_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logpass.txt");
        let pairs = load_credentials(&path).unwrap();
        assert_eq!(pairs, vec![("example".to_string(), "password".to_string())]);
        assert!(path.exists());
    }

    #[test]
    fn credentials_skip_lines_without_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logpass.txt");
        std::fs::write(&path, "alpha:pw1\njunk line\nbravo:pw2\n").unwrap();
        let pairs = load_credentials(&path).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0, "bravo");
    }

    #[test]
    fn build_accounts_joins_by_lowercased_login() {
        let records = vec![SecretRecord {
            account_name: "alpha".to_string(),
            shared_secret: Some("s".to_string()),
            identity_secret: None,
            steam_id: 42,
        }];
        let accounts = build_accounts(
            vec![
                ("Alpha".to_string(), "pw".to_string()),
                ("ghost".to_string(), "pw".to_string()),
            ],
            records,
        );
        assert_eq!(accounts[0].steam_id, 42);
        assert_eq!(accounts[0].login, "Alpha");
        assert_eq!(accounts[1].steam_id, 0);
        assert!(accounts[1].shared_secret.is_none());
    }

    #[test]
    fn steamid_lookup_reads_and_caches_record_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("76561198000000007.mafile"),
            r#"{"account_name":"charlie"}"#,
        )
        .unwrap();

        let store = SecretStore::new(dir.path());
        assert_eq!(
            store.login_for_steamid("76561198000000007").as_deref(),
            Some("charlie")
        );
        // Cached: removing the file no longer matters.
        std::fs::remove_file(dir.path().join("76561198000000007.mafile")).unwrap();
        assert_eq!(
            store.login_for_steamid("76561198000000007").as_deref(),
            Some("charlie")
        );
        assert!(store.login_for_steamid("123").is_none());
    }
}
