//! Runtime configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the remote service, always ending in `/`.
    pub api_url: String,
    pub db_path: PathBuf,
    pub session_path: PathBuf,
    pub http_timeout: Duration,
    /// Online flaps inside this window collapse into one reconciliation.
    pub debounce: Duration,
    pub probe_interval: Duration,
    /// Periodic reconciliation while online, for rows whose push failed.
    pub sync_interval: Duration,
}

impl SyncConfig {
    /// Defaults rooted at `{app_data_dir}/familyflow/`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            db_path: data_dir.join("familyflow.db"),
            session_path: data_dir.join("session.json"),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let data_dir = app_data_dir()?;
        let mut config = Self::with_data_dir(data_dir);

        if let Some(url) = lookup("FAMILYFLOW_API_URL") {
            config.api_url = normalize_base_url(&url);
        }
        if let Some(path) = lookup("FAMILYFLOW_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FAMILYFLOW_SESSION_PATH") {
            config.session_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_u64(&lookup, "FAMILYFLOW_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&lookup, "FAMILYFLOW_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64(&lookup, "FAMILYFLOW_PROBE_INTERVAL_SECS") {
            config.probe_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_u64(&lookup, "FAMILYFLOW_SYNC_INTERVAL_SECS") {
            config.sync_interval = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a non-negative integer");
            None
        }
    }
}

pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Resolve `{app_data_dir}/familyflow`.
fn app_data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;
    Ok(base.join("familyflow"))
}
