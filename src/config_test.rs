use super::*;

const KEYS: [&str; 10] = [
    "SEATPLAN_BASE_URL",
    "SEATPLAN_POLL_INTERVAL_MS",
    "SEATPLAN_FLUSH_DEBOUNCE_MS",
    "SEATPLAN_MAX_SEND_ATTEMPTS",
    "SEATPLAN_RETRY_DELAY_MS",
    "SEATPLAN_SNAPSHOT_INTERVAL_MS",
    "SEATPLAN_HISTORY_LIMIT",
    "SEATPLAN_CACHE_PATH",
    "SEATPLAN_REQUEST_TIMEOUT_SECS",
    "SEATPLAN_CONNECT_TIMEOUT_SECS",
];

fn clear_env() {
    for key in KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__SEATPLAN_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__SEATPLAN_TEST_INVALID__", "soon") };
    let val: u64 = env_parse("__SEATPLAN_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__SEATPLAN_TEST_INVALID__") };
}

// =============================================================================
// SyncConfig
// =============================================================================

// One test touches the SEATPLAN_* variables so parallel tests cannot race.
#[test]
fn from_env_defaults_and_overrides() {
    clear_env();
    assert_eq!(SyncConfig::from_env(), SyncConfig::default());

    unsafe {
        std::env::set_var("SEATPLAN_BASE_URL", "https://plan.example/api/");
        std::env::set_var("SEATPLAN_POLL_INTERVAL_MS", "250");
        std::env::set_var("SEATPLAN_MAX_SEND_ATTEMPTS", "0");
        std::env::set_var("SEATPLAN_SNAPSHOT_INTERVAL_MS", "0");
        std::env::set_var("SEATPLAN_CACHE_PATH", "/tmp/seatplan.json");
        std::env::set_var("SEATPLAN_CONNECT_TIMEOUT_SECS", "2");
    }
    let config = SyncConfig::from_env();
    clear_env();

    assert_eq!(config.base_url, "https://plan.example/api");
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    assert_eq!(config.max_send_attempts, 1);
    assert_eq!(config.snapshot_interval, None);
    assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/seatplan.json")));
    assert_eq!(config.timeouts.connect, Duration::from_secs(2));
    assert_eq!(config.flush_debounce, Duration::from_millis(DEFAULT_FLUSH_DEBOUNCE_MS));
}
