//! Engine configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::path::PathBuf;
use std::time::Duration;

use crate::api::HttpTimeouts;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_FLUSH_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Root of the REST collections, without a trailing slash.
    pub base_url: String,
    /// Poll period per entity type.
    pub poll_interval: Duration,
    /// Quiet period after the last local mutation before a flush.
    pub flush_debounce: Duration,
    /// Sends per patch before it is dropped.
    pub max_send_attempts: u32,
    /// Wait before re-flushing requeued patches.
    pub retry_delay: Duration,
    /// History capture and cache mirror period; `None` disables both.
    pub snapshot_interval: Option<Duration>,
    pub history_limit: usize,
    /// Local JSON mirror; `None` disables persistence.
    pub cache_path: Option<PathBuf>,
    pub timeouts: HttpTimeouts,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            flush_debounce: Duration::from_millis(DEFAULT_FLUSH_DEBOUNCE_MS),
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            snapshot_interval: Some(Duration::from_millis(DEFAULT_SNAPSHOT_INTERVAL_MS)),
            history_limit: DEFAULT_HISTORY_LIMIT,
            cache_path: None,
            timeouts: HttpTimeouts {
                request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
                connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
        }
    }
}

impl SyncConfig {
    /// Build config from environment variables, falling back to defaults for
    /// anything missing or unparseable.
    ///
    /// - `SEATPLAN_BASE_URL`
    /// - `SEATPLAN_POLL_INTERVAL_MS`, `SEATPLAN_FLUSH_DEBOUNCE_MS`
    /// - `SEATPLAN_MAX_SEND_ATTEMPTS`, `SEATPLAN_RETRY_DELAY_MS`
    /// - `SEATPLAN_SNAPSHOT_INTERVAL_MS` (0 disables), `SEATPLAN_HISTORY_LIMIT`
    /// - `SEATPLAN_CACHE_PATH`
    /// - `SEATPLAN_REQUEST_TIMEOUT_SECS`, `SEATPLAN_CONNECT_TIMEOUT_SECS`
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("SEATPLAN_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        let snapshot_ms = env_parse("SEATPLAN_SNAPSHOT_INTERVAL_MS", DEFAULT_SNAPSHOT_INTERVAL_MS);

        Self {
            base_url,
            poll_interval: Duration::from_millis(env_parse("SEATPLAN_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)),
            flush_debounce: Duration::from_millis(env_parse("SEATPLAN_FLUSH_DEBOUNCE_MS", DEFAULT_FLUSH_DEBOUNCE_MS)),
            max_send_attempts: env_parse("SEATPLAN_MAX_SEND_ATTEMPTS", DEFAULT_MAX_SEND_ATTEMPTS).max(1),
            retry_delay: Duration::from_millis(env_parse("SEATPLAN_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)),
            snapshot_interval: (snapshot_ms > 0).then(|| Duration::from_millis(snapshot_ms)),
            history_limit: env_parse("SEATPLAN_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
            cache_path: std::env::var_os("SEATPLAN_CACHE_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            timeouts: HttpTimeouts {
                request: Duration::from_secs(env_parse("SEATPLAN_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)),
                connect: Duration::from_secs(env_parse("SEATPLAN_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
            },
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
