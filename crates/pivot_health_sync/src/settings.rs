use pivot_health_client::config::Config;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

const DEFAULT_WINDOW_SECS: u64 = 30;
const DEFAULT_LOOKBACK_MONTHS: u32 = 3;
const DEFAULT_STATE_PATH: &str = "pivot-state.json";

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub client: Config,
    /// How long a collection window stays open before uploading.
    pub window: Duration,
    /// History fetched for a kind that has never synced.
    pub lookback_months: u32,
    pub state_path: PathBuf,
    pub samples_path: Option<PathBuf>,
}

impl SyncSettings {
    pub fn from_env() -> SyncResult<Self> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    pub fn from_env_with<F>(mut get: F) -> SyncResult<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let client = Config::from_env_with(&mut get)?;
        let window_secs = parse_or(&mut get, "PIVOT_SYNC_WINDOW_SECS", DEFAULT_WINDOW_SECS)?;
        if window_secs == 0 {
            return Err(SyncError::Config("PIVOT_SYNC_WINDOW_SECS must be positive".into()));
        }
        let lookback_months = parse_or(&mut get, "PIVOT_SYNC_LOOKBACK_MONTHS", DEFAULT_LOOKBACK_MONTHS)?;
        let state_path = get("PIVOT_STATE_PATH")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_PATH.to_string())
            .into();
        let samples_path = get("PIVOT_SAMPLES_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        Ok(Self {
            client,
            window: Duration::from_secs(window_secs),
            lookback_months,
            state_path,
            samples_path,
        })
    }
}

fn parse_or<F, T>(get: &mut F, key: &str, default: T) -> SyncResult<T>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SyncError::Config(format!("{key} is not a number: {raw}"))),
        None => Ok(default),
    }
}
