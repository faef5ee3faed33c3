use super::*;

// =============================================================================
// env_parse: uses unique env var names to avoid races with parallel tests.
// =============================================================================

#[test]
fn env_parse_reads_value() {
    let key = "__TEST_PODIUM_EP_VALUE_311__";
    unsafe { std::env::set_var(key, "42") };
    assert_eq!(env_parse(key, 7_u64), 42);
    unsafe { std::env::remove_var(key) };
}

#[test]
fn env_parse_invalid_falls_back() {
    let key = "__TEST_PODIUM_EP_INVALID_312__";
    unsafe { std::env::set_var(key, "forty-two") };
    assert_eq!(env_parse(key, 7_u64), 7);
    unsafe { std::env::remove_var(key) };
}

#[test]
fn env_parse_unset_falls_back() {
    assert_eq!(env_parse("__TEST_PODIUM_EP_UNSET_313__", 9_usize), 9);
}

#[test]
fn env_path_blank_uses_default() {
    let key = "__TEST_PODIUM_PATH_BLANK_314__";
    unsafe { std::env::set_var(key, "   ") };
    assert_eq!(env_path(key, "./fallback"), PathBuf::from("./fallback"));
    unsafe { std::env::remove_var(key) };
}

// =============================================================================
// parse_watch_mode
// =============================================================================

#[test]
fn watch_mode_defaults_to_native() {
    let interval = Duration::from_millis(500);
    assert_eq!(parse_watch_mode(None, interval).unwrap(), WatchMode::Native);
    assert_eq!(parse_watch_mode(Some(""), interval).unwrap(), WatchMode::Native);
    assert_eq!(parse_watch_mode(Some("Native"), interval).unwrap(), WatchMode::Native);
}

#[test]
fn watch_mode_poll_carries_interval() {
    let interval = Duration::from_millis(250);
    assert_eq!(parse_watch_mode(Some("poll"), interval).unwrap(), WatchMode::Poll(interval));
    assert_eq!(parse_watch_mode(Some(" POLLING "), interval).unwrap(), WatchMode::Poll(interval));
}

#[test]
fn watch_mode_off() {
    assert_eq!(parse_watch_mode(Some("off"), Duration::ZERO).unwrap(), WatchMode::Off);
}

#[test]
fn watch_mode_unknown_is_error() {
    let err = parse_watch_mode(Some("inotify"), Duration::ZERO).unwrap_err();
    assert!(err.to_string().contains("inotify"));
}

// =============================================================================
// data paths
// =============================================================================

#[test]
fn data_paths_live_under_data_dir() {
    let config = AppConfig {
        port: DEFAULT_PORT,
        content_dir: PathBuf::from("slides"),
        data_dir: PathBuf::from("/var/lib/podium"),
        presenter_token: None,
        cache_capacity: DEFAULT_CACHE_CAPACITY,
        watch_mode: WatchMode::Off,
        watch_debounce: Duration::from_millis(DEFAULT_WATCH_DEBOUNCE_MS),
        persist_interval: Duration::from_millis(DEFAULT_PERSIST_INTERVAL_MS),
        default_locale: DEFAULT_LOCALE.into(),
    };
    assert_eq!(config.stats_path(), PathBuf::from("/var/lib/podium/stats.json"));
    assert_eq!(config.forms_path(), PathBuf::from("/var/lib/podium/forms.json"));
    assert_eq!(config.feedback_path(), PathBuf::from("/var/lib/podium/feedback.json"));
}
