//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tracker configuration. File: ~/.config/vehicle-tracker/config.toml or
/// /etc/vehicle-tracker/config.toml. Env overrides: TRACKER_SERVER_URL, TRACKER_ROUTE_PATH,
/// TRACKER_POSITIONS_PATH, TRACKER_STORE_PATH, TRACKER_GPSD_ADDR, TRACKER_REPLAY_FILE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Collector base URL.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Reference route endpoint, relative to `server_url`.
    #[serde(default = "default_route_path")]
    pub route_path: String,
    /// Position report endpoint, relative to `server_url`.
    #[serde(default = "default_positions_path")]
    pub positions_path: String,
    /// Per-request HTTP timeout (default 10s).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Where the identity is persisted.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gpsd,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    #[serde(default = "default_source")]
    pub source: LocationSource,
    #[serde(default = "default_gpsd_addr")]
    pub gpsd_addr: String,
    /// JSON array of `{lat, lng}` played back by the replay source.
    #[serde(default)]
    pub replay_file: Option<PathBuf>,
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
    /// Whether this host grants location access.
    #[serde(default = "default_allow")]
    pub allow: bool,
    /// Bound on the permission prompt; elapsed counts as denied. Unset waits forever.
    #[serde(default)]
    pub permission_timeout_secs: Option<u64>,
    /// Bound on the initial fix; elapsed counts as unavailable. Unset waits forever.
    #[serde(default)]
    pub fix_timeout_secs: Option<u64>,
}

fn default_server_url() -> String {
    "http://192.168.223.150:3002".to_string()
}
fn default_route_path() -> String {
    "/api/admin-route".to_string()
}
fn default_positions_path() -> String {
    "/api/positions".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_source() -> LocationSource {
    LocationSource::Gpsd
}
fn default_gpsd_addr() -> String {
    "127.0.0.1:2947".to_string()
}
fn default_replay_interval_ms() -> u64 {
    1000
}
fn default_allow() -> bool {
    true
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            gpsd_addr: default_gpsd_addr(),
            replay_file: None,
            replay_interval_ms: default_replay_interval_ms(),
            allow: default_allow(),
            permission_timeout_secs: None,
            fix_timeout_secs: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            route_path: default_route_path(),
            positions_path: default_positions_path(),
            request_timeout_secs: default_request_timeout_secs(),
            store_path: None,
            location: LocationConfig::default(),
        }
    }
}

impl Config {
    pub fn route_url(&self) -> String {
        join_url(&self.server_url, &self.route_path)
    }

    pub fn positions_url(&self) -> String {
        join_url(&self.server_url, &self.positions_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Explicit `store_path`, else ~/.local/share/vehicle-tracker/preferences.json.
    pub fn store_path(&self) -> PathBuf {
        if let Some(p) = &self.store_path {
            return p.clone();
        }
        match std::env::var_os("HOME") {
            Some(h) => PathBuf::from(h).join(".local/share/vehicle-tracker/preferences.json"),
            None => PathBuf::from("preferences.json"),
        }
    }
}

impl LocationConfig {
    pub fn permission_timeout(&self) -> Option<Duration> {
        self.permission_timeout_secs.map(Duration::from_secs)
    }

    pub fn fix_timeout(&self) -> Option<Duration> {
        self.fix_timeout_secs.map(Duration::from_secs)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms.max(1))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: default, then config file (the explicit one, or the first default path
/// that exists), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let file = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_paths().into_iter().find(|p| p.exists()),
    };
    let mut c = match file {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("TRACKER_SERVER_URL") {
        c.server_url = s;
    }
    if let Some(s) = var("TRACKER_ROUTE_PATH") {
        c.route_path = s;
    }
    if let Some(s) = var("TRACKER_POSITIONS_PATH") {
        c.positions_path = s;
    }
    if let Some(s) = var("TRACKER_STORE_PATH") {
        c.store_path = Some(PathBuf::from(s));
    }
    if let Some(s) = var("TRACKER_GPSD_ADDR") {
        c.location.gpsd_addr = s;
    }
    if let Some(s) = var("TRACKER_REPLAY_FILE") {
        c.location.source = LocationSource::Replay;
        c.location.replay_file = Some(PathBuf::from(s));
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/vehicle-tracker/config.toml"));
    }
    out.push(PathBuf::from("/etc/vehicle-tracker/config.toml"));
    out
}

fn load_file(p: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
        path: p.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: p.to_path_buf(),
        source,
    })
}
